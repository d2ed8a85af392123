//! # Utility Functions Module
//!
//! Small helpers for building command lines for ffmpeg, ffprobe and the
//! external batch tools.

/// Converts any iterable of displayable items to `Vec<String>`.
///
/// Used to build argument vectors that mix literals, numbers and
/// `Path::display()` values without repeating `.to_string()`.
///
/// # Example
/// ```rust
/// use face_swap_pipeline::utils::to_string_vec;
///
/// let fps = 30;
/// let args = to_string_vec(["-framerate", &fps.to_string(), "-y"]);
/// assert_eq!(args, vec!["-framerate", "30", "-y"]);
/// ```
pub fn to_string_vec<T, I>(items: I) -> Vec<String>
where
    T: ToString,
    I: IntoIterator<Item = T>,
{
    items.into_iter().map(|item| item.to_string()).collect()
}

/// Builds an argument vector from heterogeneous displayable values.
///
/// ```rust
/// use face_swap_pipeline::args;
///
/// let crf = 7;
/// let args = args!["-crf", crf, "-pix_fmt", "yuv420p"];
/// assert_eq!(args, vec!["-crf", "7", "-pix_fmt", "yuv420p"]);
/// ```
#[macro_export]
macro_rules! args {
    [$($item:expr),* $(,)?] => {
        vec![$($item.to_string()),*]
    };
}

/// Replaces `{key}` placeholders in every argument of a command template.
///
/// Unknown placeholders are left untouched so a misconfigured template
/// fails loudly in the tool instead of silently losing an argument.
pub fn substitute_placeholders(template: &[String], values: &[(&str, String)]) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            values.iter().fold(arg.clone(), |acc, (key, value)| {
                acc.replace(&format!("{{{}}}", key), value)
            })
        })
        .collect()
}
