/// Replace characters that are unsafe in file names and cap the length.
pub fn safe_file_name(name: &str, max_chars: usize) -> String {
    name.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .take(max_chars)
        .collect()
}
