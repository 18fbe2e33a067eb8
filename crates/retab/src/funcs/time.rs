//! timestamps: `formatdate` and `timeadd`
//!
//! Timestamps are RFC 3339 strings, durations look like `1h30m` or `-2.5s`.
use super::FuncError;
use crate::marks::MarkedValue;
use chrono::{DateTime, FixedOffset, SecondsFormat};

type Args = Vec<MarkedValue>;
type Result = std::result::Result<MarkedValue, FuncError>;

fn timestamp(name: &str, value: &MarkedValue) -> std::result::Result<DateTime<FixedOffset>, FuncError> {
    let text = value
        .as_str()
        .ok_or_else(|| FuncError::Message(format!("{name}: the timestamp must be a string")))?;
    DateTime::parse_from_rfc3339(text)
        .map_err(|err| FuncError::Message(format!("{name}: invalid timestamp {text:?}: {err}")))
}

fn check_arity(name: &str, args: &[MarkedValue], expected: usize) -> std::result::Result<(), FuncError> {
    if args.len() != expected {
        return Err(FuncError::Arity {
            name: name.to_string(),
            expected,
            got: args.len(),
        });
    }
    Ok(())
}

/// `formatdate("DD MMM YYYY hh:mm ZZZ", timestamp)`
///
/// Letters repeat to choose a representation, text in single quotes is copied, `''` is a quote.
pub fn formatdate(args: Args) -> Result {
    check_arity("formatdate", &args, 2)?;
    let spec = args[0]
        .as_str()
        .ok_or_else(|| FuncError::Message("formatdate: the format must be a string".to_string()))?;
    let time = timestamp("formatdate", &args[1])?;
    let utc = time.offset().local_minus_utc() == 0;

    let mut out = String::new();
    let mut chars = spec.chars().peekable();
    while let Some(char) = chars.next() {
        if char == '\'' {
            if chars.peek() == Some(&'\'') {
                chars.next();
                out.push('\'');
                continue;
            }
            loop {
                match chars.next() {
                    Some('\'') if chars.peek() == Some(&'\'') => {
                        chars.next();
                        out.push('\'');
                    }
                    Some('\'') => break,
                    Some(char) => out.push(char),
                    None => {
                        return Err(FuncError::Message(
                            "formatdate: unterminated quoted literal".to_string(),
                        ))
                    }
                }
            }
            continue;
        }

        if !char.is_ascii_alphabetic() {
            out.push(char);
            continue;
        }

        let mut count = 1;
        while chars.peek() == Some(&char) {
            chars.next();
            count += 1;
        }

        let item = match (char, count) {
            ('Y', 4) => "%Y",
            ('Y', 2) => "%y",
            ('M', 4) => "%B",
            ('M', 3) => "%b",
            ('M', 2) => "%m",
            ('M', 1) => "%-m",
            ('D', 2) => "%d",
            ('D', 1) => "%-d",
            ('E', 4) => "%A",
            ('E', 3) => "%a",
            ('h', 2) => "%H",
            ('h', 1) => "%-H",
            ('H', 2) => "%I",
            ('H', 1) => "%-I",
            ('A', 2) => "%p",
            ('a', 2) => "%P",
            ('m', 2) => "%M",
            ('m', 1) => "%-M",
            ('s', 2) => "%S",
            ('s', 1) => "%-S",
            ('Z', 5) => "%:z",
            ('Z', 4) => "%z",
            ('Z', 3) if utc => "UTC",
            ('Z', 3) => "%z",
            ('Z', 1) if utc => "Z",
            ('Z', 1) => "%:z",
            _ => {
                let sequence: String = std::iter::repeat(char).take(count).collect();
                return Err(FuncError::Message(format!(
                    "formatdate: invalid date format sequence {sequence:?}"
                )));
            }
        };
        out.push_str(&time.format(item).to_string());
    }

    Ok(MarkedValue::from(out))
}

/// Nanoseconds in a duration like `1h30m`, `-1.5s` or `250ms`
fn duration(text: &str) -> std::result::Result<i64, FuncError> {
    let invalid = || FuncError::Message(format!("timeadd: invalid duration {text:?}"));

    let (sign, mut rest) = match text.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, text.strip_prefix('+').unwrap_or(text)),
    };
    if rest == "0" {
        return Ok(0);
    }
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut nanos = 0.0;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(invalid)?;
        let amount: f64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = match &rest[..unit_end] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return Err(invalid()),
        };
        rest = &rest[unit_end..];
        nanos += amount * unit;
    }

    Ok((sign * nanos) as i64)
}

/// `timeadd(timestamp, duration)`
pub fn timeadd(args: Args) -> Result {
    check_arity("timeadd", &args, 2)?;
    let time = timestamp("timeadd", &args[0])?;
    let text = args[1]
        .as_str()
        .ok_or_else(|| FuncError::Message("timeadd: the duration must be a string".to_string()))?;

    let shifted = time
        .checked_add_signed(chrono::Duration::nanoseconds(duration(text)?))
        .ok_or_else(|| FuncError::Message("timeadd: result is out of range".to_string()))?;
    Ok(MarkedValue::from(
        shifted.to_rfc3339_opts(SecondsFormat::AutoSi, true),
    ))
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn call(function: fn(Args) -> Result, args: [&str; 2]) -> String {
        function(args.into_iter().map(MarkedValue::from).collect())
            .unwrap()
            .as_str()
            .unwrap()
            .to_string()
    }

    #[test]
    fn dates_are_formatted() {
        let time = "2024-03-09T07:05:02Z";
        assert_eq!(call(formatdate, ["DD MMM YYYY hh:mm ZZZ", time]), "09 Mar 2024 07:05 UTC");
        assert_eq!(call(formatdate, ["EEEE, D MMMM YY", time]), "Saturday, 9 March 24");
        assert_eq!(call(formatdate, ["H:mmaa 'o''clock'", time]), "7:05am o'clock");
        assert_eq!(
            call(formatdate, ["YYYY-MM-DD'T'hh:mm:ssZ", "2024-03-09T07:05:02+02:00"]),
            "2024-03-09T07:05:02+02:00"
        );
        assert!(formatdate(vec!["YYY".into(), time.into()]).is_err());
    }

    #[test]
    fn durations_are_added() {
        let time = "2024-03-09T23:30:00Z";
        assert_eq!(call(timeadd, [time, "1h30m"]), "2024-03-10T01:00:00Z");
        assert_eq!(call(timeadd, [time, "-1.5s"]), "2024-03-09T23:29:58.500Z");
        assert_eq!(
            call(timeadd, ["2024-03-09T23:30:00+01:00", "10m"]),
            "2024-03-09T23:40:00+01:00"
        );
        assert!(timeadd(vec![time.into(), "3 days".into()]).is_err());
    }
}
