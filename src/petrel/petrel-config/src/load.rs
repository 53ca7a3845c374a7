/*
 * petrel mail transfer agent
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

use crate::Config;

/// Error rejecting a configuration at load time.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read configuration at '{path}': {source}")]
    Io {
        /// Offending path.
        path: std::path::PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The document is not a valid configuration; the path inside the
    /// document is part of the message.
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_path_to_error::Error<serde_json::Error>),
    /// `smtp.rcpt_count_max` went below the floor of RFC 5321 §4.5.3.1.8.
    #[error("smtp.rcpt_count_max must be at least 100 to stay RFC 5321 compliant, got {got}")]
    RecipientCeilingTooLow {
        /// The configured value.
        got: usize,
    },
    /// Authentication is mandatory but no mechanism is configured.
    #[error("smtp.auth_required is set but smtp.auth is absent or offers no mechanism")]
    AuthRequiredWithoutMechanisms,
    /// Binary bodies cannot be transferred without chunking.
    #[error("esmtp.binarymime requires esmtp.chunking")]
    BinaryMimeWithoutChunking,
}

impl Config {
    /// Load and validate a configuration from a JSON document.
    ///
    /// # Errors
    ///
    /// * the file cannot be read
    /// * the document does not match the schema
    /// * [`Config::validate`] rejects the field values
    #[inline]
    pub fn from_json_file(path: impl Into<std::path::PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;

        let deserializer = &mut serde_json::Deserializer::from_str(&content);
        let mut config: Self = serde_path_to_error::deserialize(deserializer)?;
        config.path = Some(path);
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// * a field value breaks a protocol floor or an extension dependency
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.smtp.rcpt_count_max < 100 {
            return Err(ConfigError::RecipientCeilingTooLow {
                got: self.server.smtp.rcpt_count_max,
            });
        }
        if self.server.smtp.auth_required
            && self
                .server
                .smtp
                .auth
                .as_ref()
                .map_or(true, |auth| auth.mechanisms.is_empty())
        {
            return Err(ConfigError::AuthRequiredWithoutMechanisms);
        }
        if self.server.esmtp.binarymime && !self.server.esmtp.chunking {
            return Err(ConfigError::BinaryMimeWithoutChunking);
        }
        if self.server.tls.is_none() {
            tracing::warn!(
                "No TLS configuration provided, STARTTLS will be refused and the \
                 submissions interfaces cannot serve"
            );
        }
        Ok(())
    }
}
