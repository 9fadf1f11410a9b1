/*
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::fmt::Display;

pub mod analyze;
pub mod config;
pub mod dns;
pub mod report;
pub mod spf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Io(String),
    Config(String),
    Resolver(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Config(err) => write!(f, "Configuration error: {}", err),
            Error::Resolver(err) => write!(f, "Resolver error: {}", err),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
