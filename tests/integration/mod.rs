//! Replays of real-world patch sequences against mock front-end and server
//! files: multi-step patch histories, partial failures, and results that
//! would break the JSX tree.

mod jsx_ternary;
mod scribe_history;
