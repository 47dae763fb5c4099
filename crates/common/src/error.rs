use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{context}: {source}")]
    Wrapped {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    #[must_use]
    pub fn wrap(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Wrapped {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can be built from a plain message.
///
/// Crates implement this for their own error enum and then call
/// [`impl_context!`](crate::impl_context) to get `.context()` on `Result`
/// and `Option`.
pub trait FromMessage: Sized {
    fn from_message(message: String) -> Self;
}

/// Generate a crate-local `Context` extension trait.
///
/// Must be expanded in a module where `Error: FromMessage` and
/// `Result<T> = std::result::Result<T, Error>` are in scope.
///
/// ```ignore
/// trawl_common::impl_context!();
/// ```
#[macro_export]
macro_rules! impl_context {
    () => {
        pub trait Context<T> {
            fn context(self, context: impl Into<String>) -> Result<T>;
        }

        impl<T, E: std::fmt::Display> Context<T> for std::result::Result<T, E> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                self.map_err(|source| {
                    let context = context.into();
                    <Error as $crate::FromMessage>::from_message(format!("{context}: {source}"))
                })
            }
        }

        impl<T> Context<T> for Option<T> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                self.ok_or_else(|| <Error as $crate::FromMessage>::from_message(context.into()))
            }
        }
    };
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    mod ctx {
        use super::{Error, Result};
        crate::impl_context!();
    }

    use ctx::Context;

    #[test]
    fn context_prefixes_result_errors() {
        let res: std::result::Result<(), &str> = Err("boom");
        let err = res.context("loading page").unwrap_err();
        assert_eq!(err.to_string(), "loading page: boom");
    }

    #[test]
    fn context_turns_none_into_message() {
        let err = None::<u8>.context("no session").unwrap_err();
        assert!(matches!(err, Error::Message(m) if m == "no session"));
    }

    #[test]
    fn wrap_keeps_source() {
        let io = std::io::Error::other("disk");
        let err = Error::wrap("writing config", io);
        assert_eq!(err.to_string(), "writing config: disk");
        assert!(std::error::Error::source(&err).is_some());
    }
}
