//! Delimited-text rating input (`user<d>item<d>rating[<d>timestamp]` per line).

use std::io::{self, BufRead};
use std::path::Path;
use std::sync::Arc;

use crate::compression;
use crate::config::PackConfig;
use crate::error::PackError;
use crate::pack::{PackSummary, PackWriter};
use crate::telemetry::PackEventListener;
use crate::types::Rating;

/// Parses one input line. Blank lines yield `None`; fields past the fourth are ignored.
pub fn parse_rating_line(line: &str, delimiter: &str, line_no: usize) -> Result<Option<Rating>, PackError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(None);
    }
    let mut fields = line.split(delimiter).map(str::trim);
    let mut next = |what: &str| {
        fields.next().filter(|f| !f.is_empty()).ok_or_else(|| PackError::Parse {
            line: line_no,
            details: format!("missing {} field", what),
        })
    };

    let user = next("user")?;
    let item = next("item")?;
    let value = next("rating")?;
    let timestamp = fields.next().filter(|f| !f.is_empty());

    let bad = |what: &str, raw: &str, e: &dyn std::fmt::Display| PackError::Parse {
        line: line_no,
        details: format!("invalid {} {:?}: {}", what, raw, e),
    };
    let user = user.parse::<i64>().map_err(|e| bad("user", user, &e))?;
    let item = item.parse::<i64>().map_err(|e| bad("item", item, &e))?;
    let value = value.parse::<f64>().map_err(|e| bad("rating", value, &e))?;
    let timestamp = match timestamp {
        Some(t) => Some(t.parse::<i64>().map_err(|e| bad("timestamp", t, &e))?),
        None => None,
    };
    Ok(Some(Rating {
        user,
        item,
        value,
        timestamp,
    }))
}

/// Iterator of ratings parsed from delimited text.
pub struct DelimitedRatings<R: BufRead> {
    lines: io::Lines<R>,
    delimiter: String,
    line_no: usize,
    skip: usize,
}

impl<R: BufRead> DelimitedRatings<R> {
    pub fn new(reader: R, delimiter: &str, skip_header_lines: usize) -> Self {
        DelimitedRatings {
            lines: reader.lines(),
            delimiter: delimiter.to_string(),
            line_no: 0,
            skip: skip_header_lines,
        }
    }
}

impl<R: BufRead> Iterator for DelimitedRatings<R> {
    type Item = Result<Rating, PackError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(l) => l,
                Err(e) => return Some(Err(PackError::Io(e))),
            };
            self.line_no += 1;
            if self.line_no <= self.skip {
                continue;
            }
            match parse_rating_line(&line, &self.delimiter, self.line_no) {
                Ok(Some(r)) => return Some(Ok(r)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Reads delimited ratings from `input` (plain, gzip or zstd) and writes them as a pack
/// at `output`. The first malformed line aborts the run and leaves no output behind.
pub fn pack_text_file(
    input: &Path,
    output: &Path,
    config: &PackConfig,
    listener: Arc<dyn PackEventListener>,
) -> Result<PackSummary, PackError> {
    config.validate()?;
    let (reader, _) = compression::open_decompressed(input)?;
    let mut writer =
        PackWriter::create_with(output, config.flags(), config.compression)?.with_event_listener(listener);
    for rating in DelimitedRatings::new(reader, config.field_delimiter(), config.skip_header_lines) {
        writer.write_rating(&rating?)?;
    }
    writer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::RatingDao;
    use crate::pack::PackReader;
    use crate::telemetry::noop_event_listener;

    #[test]
    fn parses_three_and_four_field_lines() {
        assert_eq!(
            parse_rating_line("1,2,3.5", ",", 1).unwrap(),
            Some(Rating::new(1, 2, 3.5))
        );
        assert_eq!(
            parse_rating_line("1::2::3.5::978300760\r\n", "::", 1).unwrap(),
            Some(Rating::with_timestamp(1, 2, 3.5, 978300760))
        );
        assert_eq!(
            parse_rating_line("1\t2\t4\t\textra", "\t", 1).unwrap(),
            Some(Rating::new(1, 2, 4.0))
        );
        assert_eq!(parse_rating_line("   ", ",", 1).unwrap(), None);
    }

    #[test]
    fn reports_line_numbers() {
        match parse_rating_line("1,x,3", ",", 17) {
            Err(PackError::Parse { line, details }) => {
                assert_eq!(line, 17);
                assert!(details.contains("item"), "{}", details);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            parse_rating_line("1,2", ",", 3),
            Err(PackError::Parse { line: 3, .. })
        ));
    }

    #[test]
    fn iterator_skips_header_and_blank_lines() {
        let text = "user,item,rating\n1,10,4\n\n2,10,3,55\n";
        let got: Vec<Rating> = DelimitedRatings::new(text.as_bytes(), ",", 1)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            got,
            vec![Rating::new(1, 10, 4.0), Rating::with_timestamp(2, 10, 3.0, 55)]
        );
    }

    #[test]
    fn packs_a_gzipped_text_file() {
        use std::io::Write;
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("ratings.csv.gz");
        let mut enc = crate::compression::CompressionMode::Gzip
            .encoder(std::fs::File::create(&input).unwrap())
            .unwrap();
        enc.write_all(b"5,1,2.0,20\n5,2,3.0,10\n6,1,1.0,30\n").unwrap();
        enc.finish().unwrap();

        let output = dir.path().join("ratings.pack");
        let summary = pack_text_file(&input, &output, &PackConfig::default(), noop_event_listener()).unwrap();
        assert_eq!(summary.rating_count, 3);
        assert!(summary.resorted);

        let r = PackReader::open(&output).unwrap();
        let ts: Vec<Option<i64>> = r.stream_all().map(|x| x.timestamp).collect();
        assert_eq!(ts, vec![Some(10), Some(20), Some(30)]);
        assert_eq!(r.items_for_user(5).len(), 2);
    }

    #[test]
    fn malformed_input_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("bad.csv");
        std::fs::write(&input, "1,2,3\noops\n").unwrap();
        let output = dir.path().join("bad.pack");
        let err = pack_text_file(&input, &output, &PackConfig::default(), noop_event_listener()).unwrap_err();
        assert!(matches!(err, PackError::Parse { line: 2, .. }));
        assert!(!output.exists());
    }
}
