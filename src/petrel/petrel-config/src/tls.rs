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

use crate::FieldServerTls;
use anyhow::Context;

fn open(path: &std::path::Path) -> anyhow::Result<std::io::BufReader<std::fs::File>> {
    Ok(std::io::BufReader::new(std::fs::File::open(path).with_context(
        || format!("failed to open '{}'", path.display()),
    )?))
}

/// Build the rustls server configuration from the PEM material on disk.
///
/// # Errors
///
/// * certificate or key file missing or unreadable
/// * no certificate or no supported private key in the files
/// * the key does not match the certificate
#[inline]
pub fn get_rustls_config(tls: &FieldServerTls) -> anyhow::Result<rustls::ServerConfig> {
    let certs = rustls_pemfile::certs(&mut open(&tls.certificate)?)
        .context("failed to parse the certificate chain")?
        .into_iter()
        .map(rustls::Certificate)
        .collect::<Vec<_>>();
    anyhow::ensure!(
        !certs.is_empty(),
        "no certificate found in '{}'",
        tls.certificate.display()
    );

    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut open(&tls.private_key)?)
        .context("failed to parse the private key")?;
    if keys.is_empty() {
        keys = rustls_pemfile::rsa_private_keys(&mut open(&tls.private_key)?)
            .context("failed to parse the private key")?;
    }
    let key = rustls::PrivateKey(
        keys.into_iter()
            .next()
            .with_context(|| format!("no private key found in '{}'", tls.private_key.display()))?,
    );

    rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("the private key does not match the certificate")
}
