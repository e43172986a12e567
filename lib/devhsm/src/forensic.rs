// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Write-only recording of intermediate provisioning artifacts.
//!
//! Only material that is public or ends up in the produced image is ever
//! handed to a sink; seeds, keys, key blobs and plaintext command blocks
//! are not.

use std::io;
use std::path::{Path, PathBuf};

pub trait ForensicSink {
    /// Stores `data` as `name`, optionally grouped under `category`.
    fn store(
        &mut self,
        name: &str,
        data: &[u8],
        category: Option<&str>,
    ) -> io::Result<()>;
}

/// Writes artifacts into a directory; categories become sub-directories.
#[derive(Debug)]
pub struct WorkspaceSink {
    root: PathBuf,
}

impl WorkspaceSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ForensicSink for WorkspaceSink {
    fn store(
        &mut self,
        name: &str,
        data: &[u8],
        category: Option<&str>,
    ) -> io::Result<()> {
        let dir = match category {
            Some(c) => self.root.join(c),
            None => self.root.clone(),
        };
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join(name), data)
    }
}
