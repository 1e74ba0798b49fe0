use thiserror::Error;

#[derive(Error, Debug)]
pub enum PathError {
  #[error("empty path")]
  Empty,

  #[error("empty segment in path")]
  EmptySegment,
}

pub type Result<T> = std::result::Result<T, PathError>;
