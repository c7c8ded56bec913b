use indicatif::{ProgressBar, ProgressStyle};

/// Bar advanced once per estimation trial.
///
/// Hidden bars accept updates but draw nothing, so callers never branch on
/// whether progress is shown.
pub fn estimation_bar(label: &str, trials: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let style = ProgressStyle::default_bar()
        .template("{prefix:.bold.dim} [{bar:30.cyan/blue}] {pos}/{len} trials {msg}")
        .expect("progress bar template is a valid static string")
        .progress_chars("█▓▒░");
    let bar = ProgressBar::new(trials as u64);
    bar.set_style(style);
    bar.set_prefix(label.to_string());
    bar
}
