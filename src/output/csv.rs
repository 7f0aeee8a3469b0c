//! Minimal CSV writer

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

fn needs_quotes(field: &str) -> bool {
    field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r')
}

/// Writes one row, quoting cells that contain separators, quotes or newlines
pub fn write_row<W: Write, S: AsRef<str>>(w: &mut W, row: &[S]) -> io::Result<()> {
    let mut first = true;
    for cell in row {
        if !first {
            w.write_all(b",")?;
        }
        first = false;

        let cell = cell.as_ref();
        if needs_quotes(cell) {
            write!(w, "\"{}\"", cell.replace('"', "\"\""))?;
        } else {
            w.write_all(cell.as_bytes())?;
        }
    }
    w.write_all(b"\n")
}

/// Writes a header and rows to `path`, returning the number of data rows
pub fn write_file<S: AsRef<str>>(
    path: &Path,
    header: &[&str],
    rows: impl IntoIterator<Item = Vec<S>>,
) -> io::Result<usize> {
    let mut w = BufWriter::new(File::create(path)?);
    write_row(&mut w, header)?;

    let mut count = 0;
    for row in rows {
        write_row(&mut w, &row)?;
        count += 1;
    }
    w.flush()?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> String {
        let mut buf = Vec::new();
        write_row(&mut buf, cells).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_plain_cells() {
        assert_eq!(row(&["389000400", "הרצל 5"]), "389000400,הרצל 5\n");
    }

    #[test]
    fn test_quoting() {
        assert_eq!(row(&["a,b", "say \"hi\"", "x"]), "\"a,b\",\"say \"\"hi\"\"\",x\n");
        assert_eq!(row(&["two\nlines"]), "\"two\nlines\"\n");
    }

    #[test]
    fn test_write_file_counts_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let n = write_file(&path, &["a", "b"], vec![vec!["1", "2"], vec!["3", "4"]]).unwrap();
        assert_eq!(n, 2);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a,b\n1,2\n3,4\n");
    }
}
