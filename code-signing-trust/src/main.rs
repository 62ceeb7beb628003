// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    chrono::{DateTime, Utc},
    clap::{Arg, ArgMatches, Command},
    code_signing_trust::{
        signed_message::decode_pem, SignatureData, SignedMessage, SignedMessageVerifier, TimeMode,
        TrustAnchors, TrustError, VerificationParams, VerificationSettings,
    },
    log::{info, LevelFilter},
    std::time::Duration,
    x509_certificate::CapturedX509Certificate,
};

const VERIFY_ABOUT: &str = "\
Verify a CMS signature extracted from a signed artifact.

The signature file holds DER, BER or PEM encoded PKCS#7 signed data. For
formats that sign detached content (Mach-O, MSI), pass the signed bytes
with --content.

Certificate chains are built to the roots in --code-signing-anchors for
signers and --timestamp-anchors for time-stamps and countersignatures.
Omitting an anchor file skips chain building for what it would anchor.

By default certificates are evaluated at the signing time or time-stamp
embedded in the signature, falling back to the current time.

The process exits non-zero unless the signature is valid.
";

fn read_file(path: &str) -> Result<Vec<u8>, TrustError> {
    std::fs::read(path).map_err(|e| TrustError::IoPath(path.into(), e))
}

fn anchors_arg(
    args: &ArgMatches,
    name: &str,
) -> Result<Option<Vec<CapturedX509Certificate>>, TrustError> {
    args.value_of(name)
        .map(TrustAnchors::certificates_from_pem_file)
        .transpose()
}

fn settings_from_args(args: &ArgMatches) -> Result<VerificationSettings, TrustError> {
    let mut settings = VerificationSettings::default();

    settings.set_anchors(TrustAnchors {
        code_signing: anchors_arg(args, "code_signing_anchors")?,
        timestamping: anchors_arg(args, "timestamp_anchors")?,
    });
    settings.set_build_chain(!args.is_present("no_chain"));
    settings.set_check_revocation(args.is_present("check_revocation"));
    settings.set_strict(args.is_present("strict"));

    if let Some(time) = args.value_of("time") {
        let time = DateTime::parse_from_rfc3339(time)
            .map_err(|e| TrustError::CliGeneralError(format!("invalid --time: {}", e)))?;
        settings.set_time_mode(TimeMode::Explicit(time.with_timezone(&Utc)));
    } else if args.is_present("current_time") {
        settings.set_time_mode(TimeMode::Current);
    }

    if let Some(seconds) = args.value_of("ocsp_timeout") {
        let seconds = seconds
            .parse::<u64>()
            .map_err(|e| TrustError::CliGeneralError(format!("invalid --ocsp-timeout: {}", e)))?;
        settings.set_ocsp_timeout(Duration::from_secs(seconds));
    }

    if let Some(path) = args.value_of("crl_cache_dir") {
        settings.set_crl_cache_dir(path);
    }

    Ok(settings)
}

fn command_verify(args: &ArgMatches) -> Result<(), TrustError> {
    let path = args.value_of("path").ok_or(TrustError::CliBadArgument)?;

    let data = read_file(path)?;
    let cms = if data.starts_with(b"-----BEGIN") {
        decode_pem(&data)?
    } else {
        data
    };

    let data = match args.value_of("content") {
        Some(content) => SignatureData::detached(cms, read_file(content)?),
        None => SignatureData::attached(cms),
    };
    let message = SignedMessage::parse(&data)?;

    let settings = settings_from_args(args)?;
    info!("using CRL cache at {}", settings.crl_cache_dir().display());
    let params = VerificationParams::new(settings)?;

    let tree = SignedMessageVerifier::new(&params).verify_tree(&message);
    if args.is_present("tree") {
        print!("{}", tree);
    }
    println!("{}", tree.result);

    if tree.is_valid() {
        Ok(())
    } else {
        Err(TrustError::CliGeneralError(format!(
            "signature is not trusted ({})",
            tree.result.status
        )))
    }
}

fn main_impl() -> Result<(), TrustError> {
    let app = Command::new("Code signing signature trust verification")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Gregory Szorc <gregory.szorc@gmail.com>")
        .about("Verify Authenticode, codesign and MSI CMS signatures")
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .multiple_occurrences(true)
                .help("Increase logging verbosity. Can be specified multiple times."),
        );

    let app = app.subcommand(
        Command::new("verify")
            .about("Verify a CMS signature")
            .long_about(VERIFY_ABOUT)
            .arg(
                Arg::new("path")
                    .required(true)
                    .help("Path to DER or PEM signature data"),
            )
            .arg(
                Arg::new("content")
                    .long("content")
                    .takes_value(true)
                    .help("Path to detached signed content"),
            )
            .arg(
                Arg::new("code_signing_anchors")
                    .long("code-signing-anchors")
                    .takes_value(true)
                    .help("PEM file of trusted code signing root certificates"),
            )
            .arg(
                Arg::new("timestamp_anchors")
                    .long("timestamp-anchors")
                    .takes_value(true)
                    .help("PEM file of trusted time-stamping root certificates"),
            )
            .arg(
                Arg::new("no_chain")
                    .long("no-chain")
                    .help("Only verify signatures; do not build certificate chains"),
            )
            .arg(
                Arg::new("check_revocation")
                    .long("check-revocation")
                    .help("Check revocation with CRLs, falling back to OCSP"),
            )
            .arg(
                Arg::new("time")
                    .long("time")
                    .takes_value(true)
                    .conflicts_with("current_time")
                    .help("RFC 3339 time to evaluate certificates at"),
            )
            .arg(
                Arg::new("current_time")
                    .long("current-time")
                    .help("Evaluate certificates at the current time"),
            )
            .arg(
                Arg::new("strict")
                    .long("strict")
                    .help("Reject known standards violations that are tolerated by default"),
            )
            .arg(
                Arg::new("ocsp_timeout")
                    .long("ocsp-timeout")
                    .takes_value(true)
                    .help("Seconds to wait for OCSP responders"),
            )
            .arg(
                Arg::new("crl_cache_dir")
                    .long("crl-cache-dir")
                    .takes_value(true)
                    .help("Directory to cache downloaded CRLs in"),
            )
            .arg(
                Arg::new("tree")
                    .long("tree")
                    .help("Print the result of every verified element"),
            ),
    );

    let matches = app.get_matches();

    let log_level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);

        builder.filter_module("rustls", LevelFilter::Error);
    }

    builder.init();

    match matches.subcommand() {
        Some(("verify", args)) => command_verify(args),
        _ => Err(TrustError::CliBadArgument),
    }
}

fn main() {
    let exit_code = match main_impl() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {}", err);
            1
        }
    };

    std::process::exit(exit_code)
}
