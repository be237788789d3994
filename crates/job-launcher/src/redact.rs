//! Masking of secrets in argument vectors, environments and captured text.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

pub const MASK: &str = "**********";

fn secret_key() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(PASSWORD|PASSWD|SECRET|TOKEN|API_KEY|ACCESS_KEY|PRIVATE_KEY|CREDENTIAL)")
            .expect("static regex")
    })
}

fn url_userinfo() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?P<scheme>[a-zA-Z][a-zA-Z0-9+.-]*://)(?P<user>[^:@/\s]+):(?P<pass>[^@/\s]+)@")
            .expect("static regex")
    })
}

fn password_flag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?P<flag>--?[a-z0-9_-]*(?:password|passwd|secret|token)[a-z0-9_-]*=)[^\s']+")
            .expect("static regex")
    })
}

/// Replace the password part of any `scheme://user:password@` in `text`.
pub fn redact_urls(text: &str) -> String {
    url_userinfo()
        .replace_all(text, format!("${{scheme}}${{user}}:{}@", MASK).as_str())
        .into_owned()
}

/// Copy of `args` safe to log and persist.
pub fn redact_args(args: &[String]) -> Vec<String> {
    let masked_flag = format!("${{flag}}{}", MASK);
    args.iter()
        .map(|arg| redact_urls(&password_flag().replace_all(arg, masked_flag.as_str())))
        .collect()
}

/// Copy of `env` with secret-looking variables masked.
pub fn redact_env(env: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    env.iter()
        .map(|(key, value)| {
            let value = if secret_key().is_match(key) {
                MASK.to_string()
            } else {
                redact_urls(value)
            };
            (key.clone(), value)
        })
        .collect()
}

/// Replace every occurrence of each known secret in `text`.
pub fn mask_secrets<'a>(text: &str, secrets: impl IntoIterator<Item = &'a str>) -> String {
    let mut masked = redact_urls(text);
    for secret in secrets {
        if secret.len() >= 4 {
            masked = masked.replace(secret, MASK);
        }
    }
    masked
}
