//! Binary sniffing: first 8 KiB, NUL byte presence (spec §4.1).

const SNIFF_WINDOW: usize = 8 * 1024;

pub fn looks_binary(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(SNIFF_WINDOW)];
    window.contains(&0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_is_not_binary() {
        assert!(!looks_binary(b"hello world\n"));
    }

    #[test]
    fn nul_byte_marks_binary() {
        assert!(looks_binary(b"hello\0world"));
    }

    #[test]
    fn nul_past_window_is_ignored() {
        let mut data = vec![b'a'; SNIFF_WINDOW + 10];
        data.push(0);
        assert!(!looks_binary(&data[..SNIFF_WINDOW]));
    }
}
