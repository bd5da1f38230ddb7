// Copyright 2026 the corral developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::io;

use thiserror::Error;

use crate::launch::LaunchError;
use crate::placement::ConfigError;
use crate::probe::ProbeResult;

#[derive(Error, Debug)]
pub enum ErrorKind {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("launch error: {0}")]
    Launch(#[from] LaunchError),
    #[error("worker {worker} failed liveness verification: {result}")]
    Verification { worker: usize, result: ProbeResult },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
#[error(transparent)]
pub struct Error(ErrorKind);

impl Error {
    fn from_kind(kind: ErrorKind) -> Self {
        Self(kind)
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }
}

impl<E> From<E> for Error
where
    E: Into<ErrorKind>,
{
    fn from(err: E) -> Self {
        Self::from_kind(err.into())
    }
}
