use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
  #[error("path is empty")]
  Empty,

  #[error("path '{0}' does not start with '$'")]
  MissingRoot(String),

  #[error("path '{0}' contains an empty segment")]
  EmptySegment(String),
}
