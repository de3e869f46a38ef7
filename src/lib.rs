// bgp-anomaly-pipeline: collector, feature aggregator and hybrid anomaly
// detection/correlation services for streamed BGP routing data.
// Copyright (C) 2026 the bgp-anomaly-pipeline contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! Library for the BGP anomaly detection pipeline: collector, feature
//! aggregator, heuristic/ML/RPKI detectors and the correlator that fuses
//! their output.

pub mod config;
pub mod correlator;
pub mod db;
pub mod detectors;
pub mod error;
pub mod identity;
pub mod models;

mod aggregator;
mod collector;

pub use aggregator::run as run_aggregator;
pub use collector::run as run_collector;

/// Initializes stdout logging from `RUST_LOG`, mirroring every upstream
/// service's `logging.basicConfig(..., StreamHandler(sys.stdout))`.
pub fn init_logging() {
    let _ = pretty_env_logger::try_init();
}

pub mod prelude {
    pub use super::{
        error::{AppError, Result},
        models::{
            BaseAttrs, Classification, Detection, DetectionMetadata, EventType, FeatureRow, Peer,
            Severity, Update,
        },
    };
}
