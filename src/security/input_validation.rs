use crate::errors::{AppError, Result};
use url::{Host, Url};

const MAX_TASK_ID_LEN: usize = 128;

pub struct InputValidator;

impl Default for InputValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl InputValidator {
    pub fn new() -> Self {
        Self
    }

    /// Accepts `http`/`https` URLs whose host is a dotted domain, `localhost` or an IPv4 address.
    pub fn validate_url(&self, url: &str) -> Result<Url> {
        let url = url.trim();
        if url.is_empty() {
            return Err(AppError::Validation("URL cannot be empty".to_string()));
        }

        let parsed_url = Url::parse(url)
            .map_err(|e| AppError::Validation(format!("Invalid URL: {}", e)))?;

        if !matches!(parsed_url.scheme(), "http" | "https") {
            return Err(AppError::Validation(format!(
                "Unsupported URL scheme: {}",
                parsed_url.scheme()
            )));
        }

        match parsed_url.host() {
            Some(Host::Domain(domain)) if is_valid_domain(domain) => Ok(parsed_url),
            Some(Host::Ipv4(_)) => Ok(parsed_url),
            Some(host) => Err(AppError::Validation(format!("Invalid host: {}", host))),
            None => Err(AppError::Validation("URL must have a host".to_string())),
        }
    }

    pub fn is_valid_url(&self, url: &str) -> bool {
        self.validate_url(url).is_ok()
    }

    /// Accepts ids made of ASCII letters, digits, `-` and `_`.
    ///
    /// Ids name the task's staging directory verbatim, so two distinct ids
    /// always map to two distinct directories.
    pub fn validate_task_id(&self, task_id: &str) -> Result<()> {
        if task_id.is_empty() || task_id.len() > MAX_TASK_ID_LEN {
            return Err(AppError::Validation(format!(
                "Task ID must be 1 to {} characters long",
                MAX_TASK_ID_LEN
            )));
        }
        if !task_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(AppError::Validation(format!(
                "Task ID {:?} may only contain letters, digits, '-' and '_'",
                task_id
            )));
        }
        Ok(())
    }
}

fn is_valid_domain(domain: &str) -> bool {
    if domain == "localhost" {
        return true;
    }
    let domain = domain.strip_suffix('.').unwrap_or(domain);
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return false;
    }

    let tld = labels[labels.len() - 1];
    let tld_ok = (2..=6).contains(&tld.len()) && tld.chars().all(|c| c.is_ascii_alphabetic());

    tld_ok
        && labels[..labels.len() - 1].iter().all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}
