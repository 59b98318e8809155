//! Files written at the end of a run.
//!
//! ```text
//! json_output_dir/
//! └── 2025-05-06/
//!     ├── morning.json
//!     ├── evening.json
//!     └── digest-7d.md
//! ```

pub mod json;
