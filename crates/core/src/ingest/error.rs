use std::fmt;
use std::time::Duration;

#[derive(Debug)]
pub enum FetchErrorKind {
    InvalidSymbol,
    /// The API rejected the request for this symbol. Retrying cannot help.
    Upstream { message: String },
    Exhausted { attempts: u32, last: anyhow::Error },
    DeadlineExceeded { deadline: Duration },
}

/// Terminal fetch failure for one symbol. Callers holding an `anyhow::Error`
/// can recover it with `downcast_ref::<FetchError>()`.
#[derive(Debug)]
pub struct FetchError {
    pub symbol: String,
    pub kind: FetchErrorKind,
}

impl FetchError {
    pub fn new(symbol: impl Into<String>, kind: FetchErrorKind) -> Self {
        Self {
            symbol: symbol.into(),
            kind,
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = &self.symbol;
        match &self.kind {
            FetchErrorKind::InvalidSymbol => write!(f, "[{symbol}] symbol must be non-empty"),
            FetchErrorKind::Upstream { message } => {
                write!(f, "[{symbol}] API error: {message}")
            }
            FetchErrorKind::Exhausted { attempts, .. } => {
                write!(f, "[{symbol}] failed to fetch after {attempts} attempts")
            }
            FetchErrorKind::DeadlineExceeded { deadline } => {
                write!(f, "[{symbol}] fetch exceeded deadline of {deadline:?}")
            }
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            FetchErrorKind::Exhausted { last, .. } => {
                let source: &(dyn std::error::Error + 'static) = last.as_ref();
                Some(source)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_message_names_the_symbol() {
        let kinds = vec![
            FetchErrorKind::Upstream {
                message: "Invalid API call".into(),
            },
            FetchErrorKind::Exhausted {
                attempts: 5,
                last: anyhow::anyhow!("rate limited"),
            },
            FetchErrorKind::DeadlineExceeded {
                deadline: Duration::from_secs(90),
            },
        ];
        for kind in kinds {
            let msg = FetchError::new("IBM", kind).to_string();
            assert!(msg.contains("IBM"), "{msg}");
        }
    }

    #[test]
    fn exhaustion_exposes_last_cause_as_source() {
        use std::error::Error;

        let err = FetchError::new(
            "MSFT",
            FetchErrorKind::Exhausted {
                attempts: 5,
                last: anyhow::anyhow!("HTTP 503"),
            },
        );
        assert_eq!(err.source().map(|s| s.to_string()), Some("HTTP 503".into()));
        let chained = format!("{:#}", anyhow::Error::new(err));
        assert_eq!(chained, "[MSFT] failed to fetch after 5 attempts: HTTP 503");
    }
}
