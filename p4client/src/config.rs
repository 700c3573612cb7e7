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

use std::time::Duration;

use crate::dispatch::DEFAULT_QUEUE_CAPACITY;
use crate::election::ElectionId;

/// Settings for one device session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    pub device_id: u64,
    pub election_id: ElectionId,
    pub role: Option<String>,

    /// Events buffered per subscriber before the oldest is dropped.
    pub event_queue_capacity: usize,

    /// Delay between losing the stream and opening a new one.
    pub reconnect_interval: Duration,

    /// Consecutive stream failures after which the session gives up and
    /// closes, or `None` to retry forever.  The count resets whenever the
    /// device answers arbitration.
    pub max_reconnect_attempts: Option<u32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            device_id: 0,
            election_id: ElectionId::new(0, 1),
            role: None,
            event_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            reconnect_interval: Duration::from_secs(1),
            max_reconnect_attempts: Some(10),
        }
    }
}

impl SessionConfig {
    pub fn new(device_id: u64, election_id: ElectionId) -> Self {
        SessionConfig {
            device_id,
            election_id,
            ..Default::default()
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_event_queue_capacity(mut self, capacity: usize) -> Self {
        self.event_queue_capacity = capacity;
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }
}
