use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt::Debug;
use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::io;


/// A result type using our [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;


/// An enum providing a rough classification of errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The input contained data not conforming to the expected format.
    InvalidData,
    /// A parameter was incorrect.
    InvalidInput,
    /// An entity was not found.
    NotFound,
    /// The operation lacked the necessary privileges.
    PermissionDenied,
    /// The operation needed to read more data than was available.
    UnexpectedEof,
    /// The operation is not supported.
    Unsupported,
    /// A catch-all for errors not fitting any other category.
    Other,
}

impl ErrorKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidData => "data not valid for the operation",
            Self::InvalidInput => "invalid input parameter",
            Self::NotFound => "entity not found",
            Self::PermissionDenied => "permission denied",
            Self::UnexpectedEof => "unexpected end of data",
            Self::Unsupported => "unsupported",
            Self::Other => "other error",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}


/// The error type used throughout the crate.
///
/// Errors carry a [`kind`][Error::kind] for programmatic handling and an
/// optional chain of human readable context added via [`ErrorExt`].
pub struct Error {
    kind: ErrorKind,
    msg: Option<Cow<'static, str>>,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl Error {
    fn new<M>(kind: ErrorKind, msg: M) -> Self
    where
        M: Into<Cow<'static, str>>,
    {
        Self {
            kind,
            msg: Some(msg.into()),
            source: None,
        }
    }

    /// Create an error of kind [`ErrorKind::InvalidData`].
    pub fn with_invalid_data<M>(msg: M) -> Self
    where
        M: Into<Cow<'static, str>>,
    {
        Self::new(ErrorKind::InvalidData, msg)
    }

    /// Create an error of kind [`ErrorKind::InvalidInput`].
    pub fn with_invalid_input<M>(msg: M) -> Self
    where
        M: Into<Cow<'static, str>>,
    {
        Self::new(ErrorKind::InvalidInput, msg)
    }

    /// Create an error of kind [`ErrorKind::NotFound`].
    pub fn with_not_found<M>(msg: M) -> Self
    where
        M: Into<Cow<'static, str>>,
    {
        Self::new(ErrorKind::NotFound, msg)
    }

    /// Create an error of kind [`ErrorKind::UnexpectedEof`].
    pub fn with_unexpected_eof<M>(msg: M) -> Self
    where
        M: Into<Cow<'static, str>>,
    {
        Self::new(ErrorKind::UnexpectedEof, msg)
    }

    /// Create an error of kind [`ErrorKind::Unsupported`].
    pub fn with_unsupported<M>(msg: M) -> Self
    where
        M: Into<Cow<'static, str>>,
    {
        Self::new(ErrorKind::Unsupported, msg)
    }

    /// Retrieve the error's kind.
    ///
    /// Context added on top of an error preserves the kind of the
    /// underlying cause.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "Error({self})")
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.msg {
            Some(msg) => f.write_str(msg)?,
            None => f.write_str(self.kind.as_str())?,
        }
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::InvalidData => ErrorKind::InvalidData,
            io::ErrorKind::InvalidInput => ErrorKind::InvalidInput,
            io::ErrorKind::NotFound => ErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            io::ErrorKind::UnexpectedEof => ErrorKind::UnexpectedEof,
            io::ErrorKind::Unsupported => ErrorKind::Unsupported,
            _ => ErrorKind::Other,
        };
        Self {
            kind,
            msg: None,
            source: Some(Box::new(err)),
        }
    }
}


/// A trait providing ergonomic means for adding context to an error.
pub trait ErrorExt: sealed::Sealed {
    /// The output type produced by [`context`][ErrorExt::context] and
    /// [`with_context`][ErrorExt::with_context].
    type Output;

    /// Add context to this error.
    fn context<C>(self, context: C) -> Self::Output
    where
        C: Into<Cow<'static, str>>;

    /// Add context to this error, lazily evaluated.
    fn with_context<C, F>(self, f: F) -> Self::Output
    where
        C: Into<Cow<'static, str>>,
        F: FnOnce() -> C;
}

impl ErrorExt for Error {
    type Output = Error;

    fn context<C>(self, context: C) -> Self::Output
    where
        C: Into<Cow<'static, str>>,
    {
        Self {
            kind: self.kind,
            msg: Some(context.into()),
            source: Some(Box::new(self)),
        }
    }

    fn with_context<C, F>(self, f: F) -> Self::Output
    where
        C: Into<Cow<'static, str>>,
        F: FnOnce() -> C,
    {
        self.context(f())
    }
}

impl<T, E> ErrorExt for Result<T, E>
where
    E: ErrorExt<Output = Error>,
{
    type Output = Result<T, Error>;

    fn context<C>(self, context: C) -> Self::Output
    where
        C: Into<Cow<'static, str>>,
    {
        self.map_err(|err| err.context(context))
    }

    fn with_context<C, F>(self, f: F) -> Self::Output
    where
        C: Into<Cow<'static, str>>,
        F: FnOnce() -> C,
    {
        self.map_err(|err| err.with_context(f))
    }
}

impl ErrorExt for io::Error {
    type Output = Error;

    fn context<C>(self, context: C) -> Self::Output
    where
        C: Into<Cow<'static, str>>,
    {
        Error::from(self).context(context)
    }

    fn with_context<C, F>(self, f: F) -> Self::Output
    where
        C: Into<Cow<'static, str>>,
        F: FnOnce() -> C,
    {
        self.context(f())
    }
}


/// A trait for conjuring an [`Error`] out of an empty [`Option`].
pub trait IntoError<T>: sealed::Sealed
where
    Self: Sized,
{
    /// Turn `None` into an error of the provided kind.
    fn ok_or_error<C, F>(self, kind: ErrorKind, f: F) -> Result<T, Error>
    where
        C: Into<Cow<'static, str>>,
        F: FnOnce() -> C;

    /// Turn `None` into an [`ErrorKind::InvalidData`] error.
    #[inline]
    fn ok_or_invalid_data<C, F>(self, f: F) -> Result<T, Error>
    where
        C: Into<Cow<'static, str>>,
        F: FnOnce() -> C,
    {
        self.ok_or_error(ErrorKind::InvalidData, f)
    }

    /// Turn `None` into an [`ErrorKind::InvalidInput`] error.
    #[inline]
    fn ok_or_invalid_input<C, F>(self, f: F) -> Result<T, Error>
    where
        C: Into<Cow<'static, str>>,
        F: FnOnce() -> C,
    {
        self.ok_or_error(ErrorKind::InvalidInput, f)
    }
}

impl<T> IntoError<T> for Option<T> {
    #[inline]
    fn ok_or_error<C, F>(self, kind: ErrorKind, f: F) -> Result<T, Error>
    where
        C: Into<Cow<'static, str>>,
        F: FnOnce() -> C,
    {
        self.ok_or_else(|| Error::new(kind, f()))
    }
}


mod sealed {
    pub trait Sealed {}

    impl Sealed for super::Error {}
    impl Sealed for std::io::Error {}
    impl<T> Sealed for Option<T> {}
    impl<T, E> Sealed for Result<T, E> where E: Sealed {}
}
