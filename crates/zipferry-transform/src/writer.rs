/// Whether `cell` must be quoted on output.
pub fn needs_quotes(cell: &str) -> bool {
    cell.contains([',', '"', '\r', '\n'])
}

/// Append one record to `out`, terminated by `\n`.
pub fn write_record<'a, I>(out: &mut Vec<u8>, cells: I)
where
    I: IntoIterator<Item = &'a str>,
{
    for (i, cell) in cells.into_iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        if needs_quotes(cell) {
            out.push(b'"');
            for part in cell.split_inclusive('"') {
                out.extend_from_slice(part.as_bytes());
                if part.ends_with('"') {
                    out.push(b'"');
                }
            }
            out.push(b'"');
        } else {
            out.extend_from_slice(cell.as_bytes());
        }
    }
    out.push(b'\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(cells: &[&str]) -> String {
        let mut out = Vec::new();
        write_record(&mut out, cells.iter().copied());
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn plain_cells() {
        assert_eq!(render(&["a", "b c", ""]), "a,b c,\n");
    }

    #[test]
    fn quoting() {
        assert_eq!(render(&["a,b"]), "\"a,b\"\n");
        assert_eq!(render(&["say \"hi\""]), "\"say \"\"hi\"\"\"\n");
        assert_eq!(render(&["two\nlines", "cr\r"]), "\"two\nlines\",\"cr\r\"\n");
        assert_eq!(render(&["\""]), "\"\"\"\"\n");
    }
}
