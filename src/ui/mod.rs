pub mod icons;
pub mod progress;
pub mod summary;

pub use progress::estimation_bar;
pub use summary::{print_discrepancies, print_round, print_sample_plan, print_status};
