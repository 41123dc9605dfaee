/// Cap a tool payload at `max_bytes`, cutting on a char boundary and noting
/// how much was dropped.
pub fn truncate_output(output: &str, max_bytes: usize) -> String {
    if output.len() <= max_bytes {
        return output.to_string();
    }
    let cut = output
        .char_indices()
        .map(|(i, _)| i)
        .take_while(|&i| i <= max_bytes)
        .last()
        .unwrap_or(0);
    format!(
        "{}\n\n[truncated: {} bytes -> {} bytes]",
        &output[..cut],
        output.len(),
        cut
    )
}
