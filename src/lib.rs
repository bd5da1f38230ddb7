// Copyright 2026 the corral developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Single-host supervision of CPU-pinned redis-server workers

pub mod launch;
pub mod placement;
pub mod probe;
pub mod supervise;
mod error;

pub use error::{Error, ErrorKind};
