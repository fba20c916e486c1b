// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Engine configuration.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Age after which an `INICIADA` compra without proof is reclaimed.
    pub reservation_timeout: Duration,
    /// How often the reaper sweeps.
    pub sweep_interval: Duration,
    pub default_page_limit: u32,
    pub max_page_limit: u32,
}

impl EngineConfig {
    pub const DEFAULT_RESERVATION_TIMEOUT: Duration = Duration::from_secs(60 * 60);
    pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

    /// Reservation timeout as a signed calendar duration.
    pub(crate) fn reservation_window(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.reservation_timeout).unwrap_or(chrono::Duration::MAX)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reservation_timeout: Self::DEFAULT_RESERVATION_TIMEOUT,
            sweep_interval: Self::DEFAULT_SWEEP_INTERVAL,
            default_page_limit: 10,
            max_page_limit: 100,
        }
    }
}
