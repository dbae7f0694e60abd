// Copyright 2025 markbench Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Registry URL encryption tooling.
//!
//! Registry maintainers use these operations to publish a registry whose
//! backend URLs are not readable without the passphrase, and to inspect one.

use anyhow::{bail, Context, Result};
use markbench_aggregator::RegistrySource;
use markbench_common::cipher::StringCipher;
use markbench_common::{decode_registry, RegistryRecord};
use std::str::FromStr;

/// Direction of a cipher operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherMode {
    Encode,
    Decode,
}

impl FromStr for CipherMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "encode" => Ok(CipherMode::Encode),
            "decode" => Ok(CipherMode::Decode),
            other => Err(format!("unknown mode '{}', expected encode or decode", other)),
        }
    }
}

/// Encrypts `plaintext` and checks that it decrypts back to the same value.
pub fn encrypt_verified(plaintext: &str, passphrase: &str) -> Result<String> {
    let ciphertext = StringCipher::encrypt(plaintext, passphrase)?;
    let decrypted = StringCipher::decrypt(&ciphertext, passphrase)?;
    if decrypted != plaintext {
        bail!("Round-trip check failed for '{}'", plaintext);
    }
    Ok(ciphertext)
}

/// Encrypts or decrypts a single value.
pub fn transform_value(mode: CipherMode, value: &str, passphrase: &str) -> Result<String> {
    match mode {
        CipherMode::Encode => encrypt_verified(value, passphrase),
        CipherMode::Decode => StringCipher::decrypt(value, passphrase)
            .with_context(|| format!("Failed to decrypt '{}'", value)),
    }
}

/// Loads a registry and re-emits it with every URL in plaintext (`Decode`)
/// or freshly encrypted (`Encode`).
///
/// The input may mix plaintext and encrypted URLs; it is decoded with
/// `passphrase` first either way.
///
/// # Returns
///
/// The registry as a pretty-printed JSON array
pub async fn transform_registry(
    source: &dyn RegistrySource,
    mode: CipherMode,
    passphrase: &str,
) -> Result<String> {
    let document = source
        .fetch()
        .await
        .with_context(|| format!("Failed to load registry from {}", source.describe()))?;
    let entries = decode_registry(&document, passphrase)?;

    let records = entries
        .iter()
        .map(|entry| {
            let url = entry.endpoint.plain_url();
            let url = match mode {
                CipherMode::Decode => url.to_string(),
                CipherMode::Encode => encrypt_verified(url, passphrase)?,
            };
            Ok(entry.to_record(url))
        })
        .collect::<Result<Vec<RegistryRecord>>>()?;

    Ok(serde_json::to_string_pretty(&records)?)
}
