use parse_display::{Display, FromStr};
use serde::{Deserialize, Serialize};


/// Terminal cause recorded as the first tag of every failure result.
#[derive(Debug, Display, FromStr, Clone, Copy, PartialEq, Eq, Hash)]
#[display(style = "SNAKE_CASE")]
pub enum EndTag {
    /// The operation returned `Err`.
    ThrewError,
    /// The operation returned a failure result.
    ReturnedError,
    /// The operation has not settled yet.
    Unfinished,
    /// The call site is dormant and never started the operation.
    Dormant,
}

/// The settled outcome of an asynchronous action.
///
/// A failed result has the same shape as a successful one, except that `error` is `true` and
/// `payload` is `None`, so consumers can render either state from the same value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult<R, N = ()> {
    pub error: bool,
    pub payload: Option<R>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_payload: Option<N>,
    pub tags: Vec<String>,
    pub message: String,
}

impl<R, N> ActionResult<R, N> {
    /// Creates a successful result.
    pub fn success(payload: R) -> Self {
        Self::success_with(payload, Vec::<String>::new(), "")
    }

    /// Creates a successful result with tags and a message.
    pub fn success_with(
        payload: R,
        tags: impl IntoIterator<Item = impl Into<String>>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: false,
            payload: Some(payload),
            error_payload: None,
            tags: tags.into_iter().map(Into::into).collect(),
            message: message.into(),
        }
    }

    /// Creates a failure result tagged [`EndTag::ReturnedError`].
    pub fn error(message: impl Into<String>) -> Self {
        Self::error_with(Vec::<String>::new(), message, None)
    }

    /// Creates a failure result tagged [`EndTag::ReturnedError`] followed by `tags`.
    pub fn error_with(
        tags: impl IntoIterator<Item = impl Into<String>>,
        message: impl Into<String>,
        error_payload: Option<N>,
    ) -> Self {
        let mut all_tags = vec![EndTag::ReturnedError.to_string()];
        all_tags.extend(tags.into_iter().map(Into::into));
        Self {
            error: true,
            payload: None,
            error_payload,
            tags: all_tags,
            message: message.into(),
        }
    }

    pub(crate) fn threw(message: impl Into<String>) -> Self {
        Self::terminal(EndTag::ThrewError, message)
    }
    pub(crate) fn unfinished() -> Self {
        Self::terminal(EndTag::Unfinished, "")
    }
    pub(crate) fn dormant() -> Self {
        Self::terminal(
            EndTag::Dormant,
            "This action has been set to not run in this context",
        )
    }
    fn terminal(tag: EndTag, message: impl Into<String>) -> Self {
        Self {
            error: true,
            payload: None,
            error_payload: None,
            tags: vec![tag.to_string()],
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        !self.error
    }

    pub fn has_tag(&self, tag: EndTag) -> bool {
        let tag = tag.to_string();
        self.tags.iter().any(|t| *t == tag)
    }

    /// Returns the terminal tag, if the first tag is one.
    pub fn end_tag(&self) -> Option<EndTag> {
        self.tags.first()?.parse().ok()
    }

    /// Converts into a `Result`, keeping the whole failure envelope as the error.
    pub fn into_result(self) -> Result<R, Self> {
        match self.payload {
            Some(payload) if !self.error => Ok(payload),
            payload => Err(Self { payload, ..self }),
        }
    }
}
