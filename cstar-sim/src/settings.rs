//  SETTINGS.rs
//    by Lut99
//
//  Created:
//    09 Apr 2024, 09:30:12
//  Last edited:
//    11 Dec 2024, 17:40:56
//  Auto updated?
//    Yes
//
//  Description:
//!   Parses and renders the ROMS runtime-control file: a line-block format
//!   where a `key:` line (possibly carrying column headers) is followed by
//!   indented value lines. Sections the framework does not recognize are
//!   carried verbatim, so rendering an untouched file reproduces it byte
//!   for byte.
//

use std::fs;
use std::path::Path;

pub use crate::errors::SettingsError as Error;


/***** CONSTANTS *****/
/// The indentation new value lines are written with.
const VALUE_INDENT: &str = "     ";





/***** LIBRARY *****/
/// One `key:` block of a runtime-settings file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Section {
    /// The key, without the trailing colon.
    pub key        : String,
    /// Whatever followed the colon on the key line (column headers, mostly).
    pub title_rest : String,
    /// The raw value lines, indentation included.
    pub lines      : Vec<String>,
}

impl Section {
    /// Returns the whitespace-separated value tokens of this section.
    pub fn values(&self) -> Vec<String> {
        self.lines.iter().flat_map(|l| l.split_whitespace().map(String::from)).collect()
    }
}



/// A parsed runtime-settings file: an ordered bag of sections, plus any
/// preamble lines that came before the first key.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RuntimeSettings {
    /// Lines before the first section (comments, typically).
    pub preamble : Vec<String>,
    /// The sections, in file order.
    pub sections : Vec<Section>,
}

impl RuntimeSettings {
    /// Reads and parses the file at the given path.
    ///
    /// # Errors
    /// This function errors if the file cannot be read. Parsing itself
    /// cannot fail: every line is either a key line or belongs to the
    /// current section.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path: &Path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(raw)  => Ok(Self::from_text(&raw)),
            Err(err) => Err(Error::FileReadError{ path: path.into(), err }),
        }
    }

    /// Parses the given text.
    ///
    /// A line starting in column zero with a non-space character and
    /// containing a colon opens a new section; everything else belongs to
    /// the section opened last (or the preamble).
    pub fn from_text(raw: impl AsRef<str>) -> Self {
        let mut res: Self = Self::default();

        for line in raw.as_ref().lines() {
            let is_key_line: bool = line
                .chars()
                .next()
                .map(|c| !c.is_whitespace() && c != '!' && c != '#')
                .unwrap_or(false)
                && line.contains(':');

            if is_key_line {
                let (key, rest): (&str, &str) = line.split_once(':').unwrap();
                res.sections.push(Section {
                    key        : key.into(),
                    title_rest : rest.into(),
                    lines      : vec![],
                });
            } else {
                match res.sections.last_mut() {
                    Some(section) => section.lines.push(line.into()),
                    None          => res.preamble.push(line.into()),
                }
            }
        }

        res
    }

    /// Renders the settings back to text.
    ///
    /// Untouched sections come out exactly as they went in.
    pub fn to_text(&self) -> String {
        let mut res: String = String::new();
        for line in &self.preamble {
            res.push_str(line);
            res.push('\n');
        }
        for section in &self.sections {
            res.push_str(&section.key);
            res.push(':');
            res.push_str(&section.title_rest);
            res.push('\n');
            for line in &section.lines {
                res.push_str(line);
                res.push('\n');
            }
        }
        res
    }

    /// Writes the rendered settings to the given path.
    ///
    /// # Errors
    /// This function errors if the file cannot be written.
    pub fn to_path(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path: &Path = path.as_ref();
        match fs::write(path, self.to_text()) {
            Ok(_)    => Ok(()),
            Err(err) => Err(Error::FileWriteError{ path: path.into(), err }),
        }
    }



    /// Returns the section with the given key, if any.
    #[inline]
    pub fn section(&self, key: impl AsRef<str>) -> Option<&Section> {
        let key: &str = key.as_ref();
        self.sections.iter().find(|s| s.key == key)
    }

    /// Returns the value tokens of the section with the given key.
    ///
    /// # Errors
    /// This function errors if there is no such section.
    pub fn values(&self, key: impl AsRef<str>) -> Result<Vec<String>, Error> {
        let key: &str = key.as_ref();
        match self.section(key) {
            Some(section) => Ok(section.values()),
            None          => Err(Error::UnknownSection{ key: key.into() }),
        }
    }

    /// Replaces the value lines of the given section with a single line of
    /// the given tokens. The section is appended if it does not exist.
    pub fn set_values(&mut self, key: impl AsRef<str>, values: &[String]) {
        self.set_lines(key, vec![format!("{}{}", VALUE_INDENT, values.join("  "))]);
    }

    /// Replaces the value lines of the given section with one line per
    /// given entry. The section is appended if it does not exist.
    pub fn set_value_lines(&mut self, key: impl AsRef<str>, entries: &[String]) {
        self.set_lines(key, entries.iter().map(|e| format!("{}{}", VALUE_INDENT, e)).collect());
    }

    /// Replaces the raw value lines of the given section, creating it if needed.
    pub fn set_lines(&mut self, key: impl AsRef<str>, lines: Vec<String>) {
        let key: &str = key.as_ref();
        match self.sections.iter_mut().find(|s| s.key == key) {
            Some(section) => { section.lines = lines; },
            None => {
                self.sections.push(Section{ key: key.into(), title_rest: String::new(), lines });
            },
        }
    }
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = "\
title:
     ROMS - MARBL test case

time_stepping: NTIMES   dt[sec]  NDTFAST  NINFO
               8640     60       60       1

S-coord: THETA_S   THETA_B    TCLINE (m)
         5.0D0     2.0D0      300.D0

grid:  filename
     input_datasets/roms_grd.nc

forcing: filename
     input_datasets/roms_frc.nc
     input_datasets/roms_bry.nc

initial: NRREC  filename
          1
     input_datasets/roms_ini.nc

some_unrecognized_block: A B C
     1.0E-4    2   three
";

    #[test]
    fn roundtrip_is_byte_exact() {
        let settings = RuntimeSettings::from_text(EXAMPLE);
        assert_eq!(settings.to_text(), EXAMPLE);
    }

    #[test]
    fn sections_parse_in_order() {
        let settings = RuntimeSettings::from_text(EXAMPLE);
        let keys: Vec<&str> = settings.sections.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, vec!["title", "time_stepping", "S-coord", "grid", "forcing", "initial", "some_unrecognized_block"]);
    }

    #[test]
    fn values_tokenize_across_lines() {
        let settings = RuntimeSettings::from_text(EXAMPLE);
        assert_eq!(settings.values("time_stepping").unwrap(), vec!["8640", "60", "60", "1"]);
        assert_eq!(settings.values("initial").unwrap(), vec!["1", "input_datasets/roms_ini.nc"]);
        assert!(settings.values("not_a_key").is_err());
    }

    #[test]
    fn numeric_spelling_is_preserved() {
        // Fortran-style doubles and exponents must survive untouched
        let settings = RuntimeSettings::from_text(EXAMPLE);
        let rendered = settings.to_text();
        assert!(rendered.contains("5.0D0"));
        assert!(rendered.contains("300.D0"));
        assert!(rendered.contains("1.0E-4"));
    }

    #[test]
    fn substitution_only_touches_its_section() {
        let mut settings = RuntimeSettings::from_text(EXAMPLE);
        settings.set_values("time_stepping", &["360".into(), "30".into(), "60".into(), "1".into()]);
        settings.set_value_lines("forcing", &["staged/roms_frc.nc".into(), "staged/roms_bry.nc".into(), "staged/roms_tides.nc".into()]);

        let rendered = settings.to_text();
        assert!(rendered.contains("time_stepping: NTIMES   dt[sec]  NDTFAST  NINFO"));
        assert!(rendered.contains("     360  30  60  1"));
        assert!(rendered.contains("     staged/roms_tides.nc"));
        // The untouched blocks are still byte-identical
        assert!(rendered.contains("S-coord: THETA_S   THETA_B    TCLINE (m)\n         5.0D0     2.0D0      300.D0"));
    }

    #[test]
    fn missing_sections_are_appended() {
        let mut settings = RuntimeSettings::from_text("title:\n     test\n");
        settings.set_values("output_root_name", &["roms_test".into()]);
        assert_eq!(settings.values("output_root_name").unwrap(), vec!["roms_test"]);
        assert!(settings.to_text().ends_with("output_root_name:\n     roms_test\n"));
    }
}
