//! Translation between the warehouse's datetime format vocabulary (`YYYY`,
//! `MM`, `FF3`, `TZH:TZM`, ...) and chrono's strftime vocabulary, plus the
//! session-parameter fallback chains that select which format string applies
//! to a given temporal kind.
//!
//! Translation is strict ordered substring substitution. The `FF` fraction
//! token is validated separately: it must be immediately preceded by `.` or
//! `,`, and an optional single digit selects the fraction width (9 when
//! omitted). chrono only implements the 3/6/9 fixed-width fraction
//! specifiers, so the render and parse helpers below expand the fraction
//! themselves instead of handing `%<n>f` to chrono.

use crate::error::HailstoneError;
use crate::params::SessionParams;
use crate::types::TransportType;
use chrono::format::{parse_and_remainder, Parsed, StrftimeItems};
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

//==================================================================================
// 1. Warehouse-to-chrono token substitution
//==================================================================================

/// Ordered substitution table. Order matters: longer tokens shadow their
/// prefixes (`YYYY` before `YY`, `MMMM` before `MM`, `TZH:TZM` before `TZH`).
const SUBSTITUTIONS: &[(&str, &str)] = &[
    ("YYYY", "%Y"),
    ("YY", "%y"),
    ("MMMM", "%B"),
    ("MM", "%m"),
    ("MON", "%b"),
    ("DD", "%d"),
    ("DY", "%a"),
    ("HH24", "%H"),
    ("HH12", "%I"),
    ("AM", "%p"),
    ("MI", "%M"),
    ("SS", "%S"),
    ("TZH:TZM", "%:z"),
    ("TZHTZM", "%z"),
    ("TZH", "%:z"),
    // A standalone TZM has no chrono counterpart; combined forms are handled above.
    ("TZM", ""),
];

/// Translates a warehouse format string to a chrono strftime string.
///
/// Fails with `IncorrectSecondsFraction` when an `FF` token is not
/// immediately preceded by `.` or `,`.
pub fn warehouse_format_to_chrono(format: &str) -> Result<String, HailstoneError> {
    let mut translated = format.to_string();
    for (from, to) in SUBSTITUTIONS {
        translated = translated.replace(from, to);
    }
    substitute_fractions(&translated, format)
}

/// Replaces each correctly-placed `FF<n?>` with a fixed-width `%<n>f` token.
/// `FF0` asks for zero fraction digits and produces no token at all.
fn substitute_fractions(translated: &str, original: &str) -> Result<String, HailstoneError> {
    let chars: Vec<char> = translated.chars().collect();
    let mut out = String::with_capacity(translated.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == 'F' && i + 1 < chars.len() && chars[i + 1] == 'F' {
            let preceded = i > 0 && (chars[i - 1] == '.' || chars[i - 1] == ',');
            if !preceded {
                return Err(HailstoneError::IncorrectSecondsFraction(
                    original.to_string(),
                ));
            }
            let mut width = 9u32;
            let mut consumed = 2;
            if let Some(d) = chars.get(i + 2).and_then(|c| c.to_digit(10)) {
                width = d;
                consumed = 3;
            }
            if width > 0 {
                out.push('%');
                out.push_str(&width.to_string());
                out.push('f');
            }
            i += consumed;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    Ok(out)
}

/// Splits a translated format at its first `%<n>f` token: the format before
/// it, the token's width, and the format after it.
fn split_first_fraction(format: &str) -> (&str, Option<usize>, &str) {
    let bytes = format.as_bytes();
    let mut i = 0;
    while i + 2 < bytes.len() {
        if bytes[i] == b'%' && bytes[i + 1].is_ascii_digit() && bytes[i + 2] == b'f' {
            let width = (bytes[i + 1] - b'0') as usize;
            return (&format[..i], Some(width), &format[i + 3..]);
        }
        // Step over whole specifiers so "%%" cannot start a false match.
        i += if bytes[i] == b'%' { 2 } else { 1 };
    }
    (format, None, "")
}

/// Expands every `%<n>f` token into the literal n-digit fraction of
/// `nanos`, leaving a format string chrono renders as-is.
fn expand_fractions(format: &str, nanos: u32) -> String {
    let digits = format!("{:09}", nanos.min(999_999_999));
    let mut out = String::with_capacity(format.len());
    let mut rest = format;
    loop {
        let (prefix, width, suffix) = split_first_fraction(rest);
        out.push_str(prefix);
        match width {
            Some(n) => out.push_str(&digits[..n]),
            None => return out,
        }
        rest = suffix;
    }
}

//==================================================================================
// 2. Session-parameter fallback chains
//==================================================================================

fn kind_key(kind: TransportType) -> Result<&'static str, HailstoneError> {
    match kind {
        TransportType::Date => Ok("date"),
        TransportType::Time => Ok("time"),
        TransportType::TimestampNtz => Ok("timestamp_ntz"),
        TransportType::TimestampLtz => Ok("timestamp_ltz"),
        TransportType::TimestampTz => Ok("timestamp_tz"),
        other => Err(HailstoneError::NoKnownFormat(other.to_string())),
    }
}

/// Server-compatible defaults, used when no parameter in the chain is set.
fn default_format(kind: TransportType) -> &'static str {
    match kind {
        TransportType::Date => "YYYY-MM-DD",
        TransportType::Time => "HH24:MI:SS",
        TransportType::TimestampNtz => "YYYY-MM-DD HH24:MI:SS.FF3",
        // LTZ and TZ defaults carry the offset.
        _ => "YYYY-MM-DD HH24:MI:SS.FF3 TZH:TZM",
    }
}

fn first_set(params: &SessionParams, keys: &[String]) -> Option<String> {
    keys.iter().find_map(|k| params.get_value(k))
}

/// Resolves the output format for `kind`: `<kind>_output_format`, then
/// `timestamp_output_format`, then the built-in default.
pub fn output_format_for(
    kind: TransportType,
    params: &SessionParams,
) -> Result<String, HailstoneError> {
    let key = kind_key(kind)?;
    let chain = [
        format!("{}_output_format", key),
        "timestamp_output_format".to_string(),
    ];
    Ok(first_set(params, &chain).unwrap_or_else(|| default_format(kind).to_string()))
}

/// Resolves the input format for `kind`: `<kind>_input_format`, then
/// `timestamp_input_format`, then the output chain.
pub fn input_format_for(
    kind: TransportType,
    params: &SessionParams,
) -> Result<String, HailstoneError> {
    let key = kind_key(kind)?;
    let chain = [
        format!("{}_input_format", key),
        "timestamp_input_format".to_string(),
        format!("{}_output_format", key),
        "timestamp_output_format".to_string(),
    ];
    Ok(first_set(params, &chain).unwrap_or_else(|| default_format(kind).to_string()))
}

//==================================================================================
// 3. Parsing / formatting helpers for structured-type payloads
//==================================================================================

/// Parses `text` against a translated format. The fraction token, whatever
/// its width, is consumed here rather than by chrono; the whole input must
/// be consumed.
fn parse_wall(kind: TransportType, text: &str, format: &str) -> Result<Parsed, HailstoneError> {
    let bad = |detail: String| {
        HailstoneError::NumberParse(format!("cannot parse '{}' as {}: {}", text, kind, detail))
    };
    let mut parsed = Parsed::new();
    let mut rest = text;
    let mut fmt = format;
    loop {
        let (prefix, width, suffix) = split_first_fraction(fmt);
        rest = parse_and_remainder(&mut parsed, rest, StrftimeItems::new(prefix))
            .map_err(|e| bad(e.to_string()))?;
        let width = match width {
            Some(width) => width,
            None => break,
        };
        let len = rest
            .bytes()
            .take_while(u8::is_ascii_digit)
            .count()
            .min(width);
        if len == 0 {
            return Err(bad("missing seconds fraction".to_string()));
        }
        let digits: u64 = rest[..len]
            .parse()
            .map_err(|_| bad("bad seconds fraction".to_string()))?;
        let nanos = digits * 10u64.pow((9 - len) as u32);
        parsed
            .set_nanosecond(nanos as i64)
            .map_err(|e| bad(e.to_string()))?;
        rest = &rest[len..];
        fmt = suffix;
    }
    if !rest.is_empty() {
        return Err(bad(format!("trailing input '{}'", rest)));
    }
    Ok(parsed)
}

/// Parses datetime text found inside a structured container, using the
/// session's output format for `kind` (that is what the server used when it
/// rendered the value into JSON).
pub fn parse_structured_datetime(
    kind: TransportType,
    text: &str,
    tz: Tz,
    params: &SessionParams,
) -> Result<DateTime<FixedOffset>, HailstoneError> {
    let format = warehouse_format_to_chrono(&output_format_for(kind, params)?)?;
    let parsed = parse_wall(kind, text, &format)?;
    let bad = |e: chrono::format::ParseError| {
        HailstoneError::NumberParse(format!("cannot parse '{}' as {}: {}", text, kind, e))
    };
    match kind {
        TransportType::Date => {
            let date = parsed.to_naive_date().map_err(bad)?;
            let naive = date.and_hms_opt(0, 0, 0).ok_or_else(|| {
                HailstoneError::InternalError("midnight out of range".to_string())
            })?;
            Ok(Utc.from_utc_datetime(&naive).fixed_offset())
        }
        TransportType::Time => {
            let time = parsed.to_naive_time().map_err(bad)?;
            let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch date");
            Ok(Utc.from_utc_datetime(&epoch.and_time(time)).fixed_offset())
        }
        TransportType::TimestampNtz => {
            let naive = parsed.to_naive_datetime_with_offset(0).map_err(bad)?;
            Ok(Utc.from_utc_datetime(&naive).fixed_offset())
        }
        TransportType::TimestampLtz => {
            let naive = parsed.to_naive_datetime_with_offset(0).map_err(bad)?;
            tz.from_local_datetime(&naive)
                .earliest()
                .map(|t| t.fixed_offset())
                .ok_or_else(|| {
                    HailstoneError::NumberParse(format!(
                        "'{}' has no representation in session timezone {}",
                        text, tz
                    ))
                })
        }
        TransportType::TimestampTz => parsed.to_datetime().map_err(bad),
        other => Err(HailstoneError::NoKnownFormat(other.to_string())),
    }
}

/// Formats a datetime for a structured bind payload, using the session's
/// input format for `kind` (that is what the server will parse it with).
pub fn format_structured_datetime(
    kind: TransportType,
    value: &DateTime<FixedOffset>,
    params: &SessionParams,
) -> Result<String, HailstoneError> {
    let format = warehouse_format_to_chrono(&input_format_for(kind, params)?)?;
    let expanded = expand_fractions(&format, value.timestamp_subsec_nanos());
    Ok(value.format(&expanded).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_translation() {
        // Every ordinary token plus a 3-digit fraction and a combined offset.
        let translated =
            warehouse_format_to_chrono("YYYY-MM-DD HH24:MI:SS.FF3 TZH:TZM").unwrap();
        assert_eq!(translated, "%Y-%m-%d %H:%M:%S.%3f %:z");
    }

    #[test]
    fn test_twelve_hour_and_names() {
        let translated = warehouse_format_to_chrono("DY, DD MON YYYY HH12:MI AM").unwrap();
        assert_eq!(translated, "%a, %d %b %Y %I:%M %p");
    }

    #[test]
    fn test_ff_without_digit_defaults_to_nine() {
        let translated = warehouse_format_to_chrono("HH24:MI:SS.FF").unwrap();
        assert_eq!(translated, "%H:%M:%S.%9f");
    }

    #[test]
    fn test_ff_after_comma_is_accepted() {
        let translated = warehouse_format_to_chrono("SS,FF4").unwrap();
        assert_eq!(translated, "%S,%4f");
    }

    #[test]
    fn test_ff_zero_yields_no_fraction_token() {
        let translated = warehouse_format_to_chrono("HH24:MI:SS.FF0").unwrap();
        assert_eq!(translated, "%H:%M:%S.");
    }

    #[test]
    fn test_bare_ff_is_rejected() {
        let err = warehouse_format_to_chrono("HH24:MI:SS FF3").unwrap_err();
        assert!(matches!(err, HailstoneError::IncorrectSecondsFraction(_)));
    }

    #[test]
    fn test_output_fallback_chain() {
        let params = SessionParams::from_iter(vec![(
            "timestamp_output_format",
            Some("YYYY-MM-DD HH24:MI:SS.FF6".to_string()),
        )]);
        // No ntz-specific key set, falls back to the generic timestamp key.
        let format = output_format_for(TransportType::TimestampNtz, &params).unwrap();
        assert_eq!(format, "YYYY-MM-DD HH24:MI:SS.FF6");
        // Date has its own default and never falls to the timestamp key... except
        // via the chain, which prefers the explicit timestamp format here.
        let params = SessionParams::new();
        assert_eq!(
            output_format_for(TransportType::Date, &params).unwrap(),
            "YYYY-MM-DD"
        );
    }

    #[test]
    fn test_input_falls_back_to_output() {
        let params = SessionParams::from_iter(vec![(
            "date_output_format",
            Some("DD/MM/YYYY".to_string()),
        )]);
        let format = input_format_for(TransportType::Date, &params).unwrap();
        assert_eq!(format, "DD/MM/YYYY");
    }

    #[test]
    fn test_unknown_kind_has_no_format() {
        let params = SessionParams::new();
        assert!(matches!(
            output_format_for(TransportType::Text, &params),
            Err(HailstoneError::NoKnownFormat(_))
        ));
    }

    #[test]
    fn test_parse_structured_ntz() {
        let params = SessionParams::new();
        let parsed = parse_structured_datetime(
            TransportType::TimestampNtz,
            "2024-06-15 13:45:07.250",
            chrono_tz::UTC,
            &params,
        )
        .unwrap();
        assert_eq!(parsed.timestamp(), 1_718_459_107);
        assert_eq!(parsed.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn test_parse_structured_date() {
        let params = SessionParams::new();
        let parsed = parse_structured_datetime(
            TransportType::Date,
            "2024-06-15",
            chrono_tz::UTC,
            &params,
        )
        .unwrap();
        assert_eq!(parsed.timestamp(), 1_718_409_600);
    }

    #[test]
    fn test_trailing_text_is_rejected() {
        let params = SessionParams::new();
        assert!(parse_structured_datetime(
            TransportType::Date,
            "2024-06-15 extra",
            chrono_tz::UTC,
            &params,
        )
        .is_err());
    }

    #[test]
    fn test_four_digit_fraction_formats_and_parses() {
        // chrono has no %4f specifier; the width is expanded by this module.
        let params = SessionParams::from_iter(vec![(
            "timestamp_ntz_output_format",
            Some("YYYY-MM-DD HH24:MI:SS.FF4".to_string()),
        )]);
        let t = DateTime::parse_from_rfc3339("2024-06-15T13:45:07.250Z").unwrap();
        let rendered =
            format_structured_datetime(TransportType::TimestampNtz, &t, &params).unwrap();
        assert_eq!(rendered, "2024-06-15 13:45:07.2500");

        let parsed = parse_structured_datetime(
            TransportType::TimestampNtz,
            &rendered,
            chrono_tz::UTC,
            &params,
        )
        .unwrap();
        assert_eq!(parsed, t);
    }

    #[test]
    fn test_every_fraction_width_round_trips() {
        let t = DateTime::parse_from_rfc3339("2024-06-15T13:45:07.123456789Z").unwrap();
        for width in 1..=9u32 {
            let params = SessionParams::from_iter(vec![(
                "timestamp_ntz_output_format",
                Some(format!("YYYY-MM-DD HH24:MI:SS.FF{}", width)),
            )]);
            let rendered =
                format_structured_datetime(TransportType::TimestampNtz, &t, &params).unwrap();
            let expected_fraction = &"123456789"[..width as usize];
            assert!(
                rendered.ends_with(&format!(".{}", expected_fraction)),
                "width {}: {}",
                width,
                rendered
            );

            let parsed = parse_structured_datetime(
                TransportType::TimestampNtz,
                &rendered,
                chrono_tz::UTC,
                &params,
            )
            .unwrap();
            let keep = 10u32.pow(9 - width);
            let truncated = t.timestamp_subsec_nanos() / keep * keep;
            assert_eq!(parsed.timestamp(), t.timestamp(), "width {}", width);
            assert_eq!(parsed.timestamp_subsec_nanos(), truncated, "width {}", width);
        }
    }

    #[test]
    fn test_fraction_width_with_offset_suffix() {
        let params = SessionParams::from_iter(vec![(
            "timestamp_tz_output_format",
            Some("YYYY-MM-DD HH24:MI:SS.FF4 TZH:TZM".to_string()),
        )]);
        let t = DateTime::parse_from_rfc3339("2024-06-15T13:45:07.250+01:00").unwrap();
        let rendered =
            format_structured_datetime(TransportType::TimestampTz, &t, &params).unwrap();
        assert_eq!(rendered, "2024-06-15 13:45:07.2500 +01:00");

        let parsed = parse_structured_datetime(
            TransportType::TimestampTz,
            &rendered,
            chrono_tz::UTC,
            &params,
        )
        .unwrap();
        assert_eq!(parsed, t);
        assert_eq!(parsed.offset().local_minus_utc(), 3600);
    }
}
