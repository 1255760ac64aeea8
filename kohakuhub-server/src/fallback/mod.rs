// Copyright 2025 KohakuHub Contributors
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

//! Fallback layer: when the local hub does not have a repo or file,
//! transparently relay to configured mirrors (self-similar peers or
//! HuggingFace-shaped hubs). Only the (repo → source) mapping is cached,
//! never content.

pub mod cache;
pub mod client;
pub mod proxy;
pub mod sources;
