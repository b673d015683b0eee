use once_cell::sync::Lazy;
use regex::Regex;

pub fn is_valid_name(string: &str) -> Result<(), String> {
    static RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^[0-9a-zа-яA-ZА-Я_\-]+$").unwrap());

    if string.chars().count() > 32 {
        return Err("name is longer than 32 characters".to_string());
    }

    match RE.is_match(string) {
        true => Ok(()),
        false => Err(
            "name may only contain letters, digits, underscores and dashes"
                .to_string(),
        ),
    }
}

pub fn is_valid_color(string: &str) -> Result<(), String> {
    static RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^#[a-fA-F0-9]{6}$").unwrap());

    match RE.is_match(string) {
        true => Ok(()),
        false => Err("color should look like #1a2b3c".to_string()),
    }
}

pub fn is_valid_url(string: &str) -> Result<(), String> {
    match url::Url::parse(string) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        _ => Err("invalid url".to_string()),
    }
}

pub fn is_valid_score(score: f32) -> Result<(), String> {
    match score.is_finite() && (0.0..=10.0).contains(&score) {
        true => Ok(()),
        false => Err("score should be between 0 and 10".to_string()),
    }
}

#[cfg(test)]
#[test]
fn test_name() {
    assert!(is_valid_name("Кочерга_2").is_ok());
    assert!(is_valid_name("film club").is_err());
    assert!(is_valid_name("").is_err());
    assert!(is_valid_name(&"я".repeat(33)).is_err());
    assert!(is_valid_name(&"я".repeat(32)).is_ok());
}

#[cfg(test)]
#[test]
fn test_color() {
    assert!(is_valid_color("#1a2B3c").is_ok());
    assert!(is_valid_color("1a2B3c").is_err());
    assert!(is_valid_color("#1a2B3").is_err());
}

#[cfg(test)]
#[test]
fn test_score() {
    assert!(is_valid_score(0.0).is_ok());
    assert!(is_valid_score(10.0).is_ok());
    assert!(is_valid_score(10.5).is_err());
    assert!(is_valid_score(f32::NAN).is_err());
}
