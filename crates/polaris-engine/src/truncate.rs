/// Default cap on what a single tool result may feed back to the model.
pub const DEFAULT_MAX_OUTPUT: usize = 256 * 1024;

/// Truncate tool output if it exceeds `max_bytes`.
/// Truncates at a char boundary and appends a marker showing original vs truncated size.
pub fn truncate_output(output: &str, max_bytes: usize) -> String {
    if output.len() <= max_bytes {
        return output.to_string();
    }
    let boundary = floor_char_boundary(output, max_bytes);
    format!(
        "{}\n\n[truncated: {} bytes -> {} bytes]",
        &output[..boundary],
        output.len(),
        boundary
    )
}

/// Short single-line preview for events and logs.
pub fn preview(output: &str, max_chars: usize) -> String {
    let line = output.lines().next().unwrap_or("");
    let mut out: String = line.chars().take(max_chars).collect();
    if line.chars().count() > max_chars || output.lines().nth(1).is_some() {
        out.push_str("...");
    }
    out
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    let mut i = index.min(s.len());
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
