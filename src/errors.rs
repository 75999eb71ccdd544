use crate::StatusCode;
use std::{error, io};
use thiserror::Error;

/// Everything that can go wrong while a session reads, routes or answers a
/// request.
///
/// Only three variants are visible to clients (see [`ErrorKind::status`]);
/// the rest close the connection without writing a single byte.
#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("request line does not split into method, path and version")]
    MalformedRequestLine,
    #[error("request carries neither an upgrade nor a content-length")]
    MissingBodyFraming,
    #[error("content-length is not a decimal number")]
    InvalidContentLength,
    #[error("declared body of {declared} bytes exceeds the limit of {limit} bytes")]
    BodyTooLarge { declared: usize, limit: usize },
    #[error("header section exceeds {0} bytes")]
    HeadersTooLarge(usize),
    #[error("websocket frame of {0} bytes exceeds the configured limit")]
    FrameTooLarge(u64),
    #[error("websocket upgrade without Sec-WebSocket-Key")]
    MissingWebSocketKey,

    #[error("no handler table for this method")]
    HandlerLookupFailure,
    #[error("handler failed: {0}")]
    HandlerInvocationFailure(#[source] HandlerError),
    #[error("no route matched")]
    RouteNotFound,

    #[error("request was not completed in time")]
    Timeout,
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ErrorKind {
    /// Status code the router answers with, or `None` when the error is
    /// fatal to the connection.
    #[inline]
    pub const fn status(&self) -> Option<StatusCode> {
        match self {
            ErrorKind::RouteNotFound => Some(StatusCode::NotFound),
            ErrorKind::HandlerInvocationFailure(_) => Some(StatusCode::InternalServerError),
            ErrorKind::HandlerLookupFailure => Some(StatusCode::NotImplemented),
            _ => None,
        }
    }
}

/// Error returned by a [`Handler`](crate::Handler).
///
/// Any error type can be turned into one with `?` through
/// [`HandlerError::new`] or the `From` impls below.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(Box<dyn error::Error + Send + Sync>),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Session(Box<ErrorKind>),
}

impl HandlerError {
    pub fn new<E>(err: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        HandlerError::Failed(err.into())
    }

    /// Shortcut for a plain text failure message.
    pub fn msg(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into().into())
    }
}

impl From<ErrorKind> for HandlerError {
    fn from(err: ErrorKind) -> Self {
        HandlerError::Session(Box::new(err))
    }
}

/// Result type every handler returns.
pub type HandlerResult = Result<(), HandlerError>;
