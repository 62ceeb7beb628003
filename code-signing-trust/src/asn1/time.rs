// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! ASN.1 `UTCTime` and `GeneralizedTime` decoding into chrono.
//!
//! Time-stamp authorities emit fractional seconds in `GeneralizedTime`, so
//! these parsers accept them.

use {
    bcder::{
        decode::{Constructed, DecodeError, Primitive, Source},
        Tag,
    },
    chrono::{DateTime, NaiveDate, TimeZone, Utc},
};

/// Parse the content octets of a `UTCTime`.
///
/// Years 50-99 map to 19xx, per RFC 5280.
pub fn parse_utc_time(data: &[u8]) -> Option<DateTime<Utc>> {
    let digits = data.strip_suffix(b"Z")?;
    if !digits.iter().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let s = std::str::from_utf8(digits).ok()?;

    let (date, seconds) = match s.len() {
        12 => (&s[0..10], s[10..12].parse::<u32>().ok()?),
        10 => (s, 0),
        _ => return None,
    };

    let year = date[0..2].parse::<i32>().ok()?;
    let year = if year >= 50 { 1900 + year } else { 2000 + year };

    build(
        year,
        date[2..4].parse().ok()?,
        date[4..6].parse().ok()?,
        date[6..8].parse().ok()?,
        date[8..10].parse().ok()?,
        seconds,
        0,
    )
}

/// Parse the content octets of a `GeneralizedTime`.
pub fn parse_generalized_time(data: &[u8]) -> Option<DateTime<Utc>> {
    let s = std::str::from_utf8(data).ok()?;
    let s = s.strip_suffix('Z')?;

    if s.len() < 14 || !s.as_bytes()[0..14].iter().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let nanos = match &s[14..] {
        "" => 0,
        fraction => {
            let digits = fraction.strip_prefix('.')?;
            if digits.is_empty() || digits.len() > 9 || !digits.bytes().all(|b| b.is_ascii_digit())
            {
                return None;
            }
            format!("{:0<9}", digits).parse::<u32>().ok()?
        }
    };

    build(
        s[0..4].parse().ok()?,
        s[4..6].parse().ok()?,
        s[6..8].parse().ok()?,
        s[8..10].parse().ok()?,
        s[10..12].parse().ok()?,
        s[12..14].parse().ok()?,
        nanos,
    )
}

fn build(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
    nanos: u32,
) -> Option<DateTime<Utc>> {
    let naive = NaiveDate::from_ymd_opt(year, month, day)?
        .and_hms_nano_opt(hour, minute, second, nanos)?;

    Some(Utc.from_utc_datetime(&naive))
}

fn utc_time_from_primitive<S: Source>(
    prim: &mut Primitive<S>,
) -> Result<DateTime<Utc>, DecodeError<S::Error>> {
    let data = prim.take_all()?;
    parse_utc_time(data.as_ref()).ok_or_else(|| prim.content_err("invalid UTCTime"))
}

fn generalized_time_from_primitive<S: Source>(
    prim: &mut Primitive<S>,
) -> Result<DateTime<Utc>, DecodeError<S::Error>> {
    let data = prim.take_all()?;
    parse_generalized_time(data.as_ref())
        .ok_or_else(|| prim.content_err("invalid GeneralizedTime"))
}

/// Take a `GeneralizedTime`.
pub fn take_generalized_time<S: Source>(
    cons: &mut Constructed<S>,
) -> Result<DateTime<Utc>, DecodeError<S::Error>> {
    cons.take_primitive_if(Tag::GENERALIZED_TIME, generalized_time_from_primitive)
}

/// Take an optional `Time ::= CHOICE { utcTime UTCTime, generalTime GeneralizedTime }`.
pub fn take_opt_time<S: Source>(
    cons: &mut Constructed<S>,
) -> Result<Option<DateTime<Utc>>, DecodeError<S::Error>> {
    if let Some(time) = cons.take_opt_primitive_if(Tag::UTC_TIME, utc_time_from_primitive)? {
        Ok(Some(time))
    } else {
        cons.take_opt_primitive_if(Tag::GENERALIZED_TIME, generalized_time_from_primitive)
    }
}

/// Take a `Time` CHOICE.
pub fn take_time<S: Source>(
    cons: &mut Constructed<S>,
) -> Result<DateTime<Utc>, DecodeError<S::Error>> {
    match take_opt_time(cons)? {
        Some(time) => Ok(time),
        None => Err(cons.content_err("expected UTCTime or GeneralizedTime")),
    }
}
