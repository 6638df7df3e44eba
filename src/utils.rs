/// Print an error, followed by every error in its `source` chain. Used for the
/// `Debug` impls of the top-level error enums, so that `{e:?}` in logs and on
/// stderr shows the underlying cause, not just the outermost message.
pub fn error_chain_fmt(
    e: &impl std::error::Error,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    writeln!(f, "{}\n", e)?;
    let mut current = e.source();
    while let Some(cause) = current {
        writeln!(f, "Caused by:\n\t{}", cause)?;
        current = cause.source();
    }
    Ok(())
}

/// First `max` characters (not bytes) of `s`
pub fn truncate(
    s: &str,
    max: usize,
) -> String {
    s.chars().take(max).collect()
}
