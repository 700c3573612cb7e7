/*
Copyright (c) 2022 VMware, Inc.
SPDX-License-Identifier: MIT
Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:
The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.
THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
*/

use std::sync::{Arc, PoisonError, RwLock};

use crate::error::LookupError;
use crate::schema::{ObjectKind, Schema};

/// The active schema of a session.
///
/// The lock is held only to clone or swap the pointer.  A lookup works on
/// the snapshot it took when it started, so it never sees a half-replaced
/// schema and never returns an id from a schema that has been replaced.
#[derive(Debug, Default)]
pub struct SymbolTable {
    schema: RwLock<Option<Arc<Schema>>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Result<Arc<Schema>, LookupError> {
        self.schema
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(LookupError::NoSchema)
    }

    /// Installs `schema`, returning the one it replaces.
    pub fn replace(&self, schema: Arc<Schema>) -> Option<Arc<Schema>> {
        self.schema
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(schema)
    }

    pub fn clear(&self) -> Option<Arc<Schema>> {
        self.schema
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn resolve(&self, kind: ObjectKind, name: &str) -> Result<u32, LookupError> {
        self.snapshot()?.resolve(kind, name)
    }
}
