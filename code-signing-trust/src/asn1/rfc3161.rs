// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Time-stamp token payload (RFC 3161 section 2.4.2).
//!
//! Only decoding is supported. Tokens are produced by time-stamp authorities,
//! never by this crate.

use {
    crate::asn1::time::take_generalized_time,
    bcder::{
        decode::{Constructed, DecodeError, Source},
        ConstOid, Integer, OctetString, Oid, Tag, Unsigned,
    },
    chrono::{DateTime, Duration, Utc},
    x509_certificate::rfc5280::AlgorithmIdentifier,
};

/// id-ct-TSTInfo
///
/// 1.2.840.113549.1.9.16.1.4
pub const OID_CONTENT_TYPE_TST_INFO: ConstOid = Oid(&[42, 134, 72, 134, 247, 13, 1, 9, 16, 1, 4]);

/// id-aa-timeStampToken, the unsigned attribute carrying a token.
///
/// 1.2.840.113549.1.9.16.2.14
pub const OID_TIME_STAMP_TOKEN: ConstOid = Oid(&[42, 134, 72, 134, 247, 13, 1, 9, 16, 2, 14]);

/// `MessageImprint`: digest algorithm and digest of the time-stamped data.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MessageImprint {
    pub hash_algorithm: AlgorithmIdentifier,
    pub hashed_message: OctetString,
}

/// `TSTInfo`, the content a time-stamp authority signs.
///
/// Only version 1 is accepted. `ordering`, `tsa` and `extensions` are read
/// and discarded.
#[derive(Clone, Debug)]
pub struct TstInfo {
    pub policy: Oid,
    pub message_imprint: MessageImprint,
    pub serial_number: Integer,
    pub gen_time: DateTime<Utc>,
    pub accuracy: Accuracy,
    pub nonce: Option<Integer>,
}

impl TstInfo {
    pub fn take_from<S: Source>(cons: &mut Constructed<S>) -> Result<Self, DecodeError<S::Error>> {
        cons.take_sequence(|cons| {
            let version = cons.take_primitive_if(Tag::INTEGER, Unsigned::u8_from_primitive)?;
            if version != 1 {
                return Err(cons.content_err("unsupported TSTInfo version"));
            }

            let policy = Oid::take_from(cons)?;
            let message_imprint = cons.take_sequence(|cons| {
                Ok(MessageImprint {
                    hash_algorithm: AlgorithmIdentifier::take_from(cons)?,
                    hashed_message: OctetString::take_from(cons)?,
                })
            })?;
            let serial_number = Integer::take_from(cons)?;
            let gen_time = take_generalized_time(cons)?;
            let accuracy = cons
                .take_opt_sequence(|cons| Accuracy::from_sequence(cons))?
                .unwrap_or_default();
            cons.take_opt_bool()?;
            let nonce = cons.take_opt_primitive_if(Tag::INTEGER, Integer::from_primitive)?;
            cons.take_opt_constructed_if(Tag::CTX_0, |cons| cons.capture_all())?;
            cons.take_opt_constructed_if(Tag::CTX_1, |cons| cons.capture_all())?;

            Ok(Self {
                policy,
                message_imprint,
                serial_number,
                gen_time,
                accuracy,
                nonce,
            })
        })
    }

    /// Earliest and latest instants the token may have been generated at.
    pub fn gen_time_bounds(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let slack = self.accuracy.as_duration();

        (self.gen_time - slack, self.gen_time + slack)
    }
}

/// Maximum deviation of `genTime` from UTC.
///
/// Each component is optional on the wire and reads as zero when absent, as
/// does a missing `accuracy` field.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Accuracy {
    pub seconds: u32,
    pub millis: u16,
    pub micros: u16,
}

impl Accuracy {
    fn from_sequence<S: Source>(cons: &mut Constructed<S>) -> Result<Self, DecodeError<S::Error>> {
        Ok(Self {
            seconds: cons
                .take_opt_primitive_if(Tag::INTEGER, Unsigned::u32_from_primitive)?
                .unwrap_or(0),
            millis: cons
                .take_opt_primitive_if(Tag::CTX_0, Unsigned::u16_from_primitive)?
                .unwrap_or(0),
            micros: cons
                .take_opt_primitive_if(Tag::CTX_1, Unsigned::u16_from_primitive)?
                .unwrap_or(0),
        })
    }

    pub fn as_duration(&self) -> Duration {
        Duration::seconds(self.seconds as i64)
            + Duration::milliseconds(self.millis as i64)
            + Duration::microseconds(self.micros as i64)
    }
}
