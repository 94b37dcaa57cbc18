// SPDX-License-Identifier: GPL-3.0-or-later

#[derive(thiserror::Error, Debug)]
pub enum DiffractionError {
    #[error("Configuration error: {0}")]       Configuration(String),
    #[error("Invalid argument: {0}")]          Argument(String),
    #[error("Kernel compilation failed: {0}")] KernelCompilation(String),
}

pub type Result<T> = std::result::Result<T, DiffractionError>;
