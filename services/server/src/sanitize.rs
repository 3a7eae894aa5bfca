/// Strip disallowed characters from inbound text.
///
/// Keeps printable ASCII (0x20-0x7E) plus line feed, carriage return, and
/// tab; everything else (control bytes, non-ASCII) is dropped.  Thermal
/// printer character ROMs render nothing else.
#[must_use]
pub fn sanitize(input: &str) -> String {
    input
        .chars()
        .filter(|&c| matches!(c, '\n' | '\r' | '\t') || (' '..='~').contains(&c))
        .collect()
}
