use std::str::FromStr;

/// Parse a boolean flag from a string value, or return the given default value otherwise.
pub fn parse_boolean_flag(value: Option<String>, default: bool) -> bool {
    let value = match value {
        Some(v) => v,
        None => return default,
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

/// Parse a value of type `T` from an optional string. Returns `Err` with a description if the value is present but
/// cannot be parsed, so that the caller can decide how loudly to complain before falling back to a default.
pub fn parse_optional<T: FromStr>(value: Option<String>) -> Result<Option<T>, String>
where T::Err: std::fmt::Display {
    match value {
        None => Ok(None),
        Some(s) => s.trim().parse::<T>().map(Some).map_err(|e| format!("'{s}' is not a valid value. {e}")),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn boolean_flags() {
        assert!(parse_boolean_flag(Some("Yes".into()), false));
        assert!(!parse_boolean_flag(Some("0".into()), true));
        assert!(parse_boolean_flag(Some("maybe".into()), true));
        assert!(!parse_boolean_flag(None, false));
    }

    #[test]
    fn optional_values() {
        assert_eq!(parse_optional::<i64>(Some(" 42 ".into())), Ok(Some(42)));
        assert_eq!(parse_optional::<i64>(None), Ok(None));
        assert!(parse_optional::<i64>(Some("forty-two".into())).is_err());
    }
}
