// Source maps (v3) for concatenated bundles and processed stylesheets

use crate::utils::Result;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};

const BASE64_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Source map format (v3)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMap {
    pub version: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources_content: Option<Vec<String>>,
    pub names: Vec<String>,
    pub mappings: String,
}

impl Default for SourceMap {
    fn default() -> Self {
        Self {
            version: 3,
            file: None,
            sources: Vec::new(),
            sources_content: None,
            names: Vec::new(),
            mappings: String::new(),
        }
    }
}

impl SourceMap {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_data_url(&self) -> Result<String> {
        let encoded = general_purpose::STANDARD.encode(self.to_json()?.as_bytes());
        Ok(format!("data:application/json;charset=utf-8;base64,{}", encoded))
    }
}

#[derive(Debug, Clone, Copy)]
struct Mapping {
    generated_line: u32,
    generated_column: u32,
    source_index: u32,
    original_line: u32,
    original_column: u32,
}

/// Line-granular source map builder
#[derive(Debug, Default)]
pub struct SourceMapBuilder {
    sources: Vec<String>,
    sources_content: Vec<String>,
    mappings: Vec<Mapping>,
}

impl SourceMapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a source file with its content
    pub fn add_source(&mut self, source_path: &str, content: &str) -> u32 {
        let index = self.sources.len() as u32;
        self.sources.push(source_path.to_string());
        self.sources_content.push(content.to_string());
        index
    }

    /// Zero-based positions, as in the v3 format
    pub fn add_mapping(&mut self, generated_line: u32, generated_column: u32, source_index: u32, original_line: u32, original_column: u32) {
        self.mappings.push(Mapping {
            generated_line,
            generated_column,
            source_index,
            original_line,
            original_column,
        });
    }

    pub fn build(mut self, file: Option<String>) -> SourceMap {
        self.mappings
            .sort_by_key(|m| (m.generated_line, m.generated_column));

        SourceMap {
            version: 3,
            file,
            mappings: encode_mappings(&self.mappings),
            sources: self.sources,
            sources_content: Some(self.sources_content),
            names: Vec::new(),
        }
    }
}

/// Map every line of a standalone processed file to the first line of its
/// source. Used for stylesheets whose processors do not track positions.
pub fn file_level_map(file: &str, source_path: &str, source: &str, generated: &str) -> SourceMap {
    let mut builder = SourceMapBuilder::new();
    let index = builder.add_source(source_path, source);
    for line in 0..generated.lines().count() as u32 {
        builder.add_mapping(line, 0, index, 0, 0);
    }
    builder.build(Some(file.to_string()))
}

fn encode_mappings(mappings: &[Mapping]) -> String {
    let mut out = String::new();
    let mut line = 0;
    let mut prev_source = 0i64;
    let mut prev_original_line = 0i64;
    let mut prev_original_column = 0i64;
    let mut prev_generated_column = 0i64;
    let mut first_in_line = true;

    for mapping in mappings {
        while line < mapping.generated_line {
            out.push(';');
            line += 1;
            prev_generated_column = 0;
            first_in_line = true;
        }
        if !first_in_line {
            out.push(',');
        }
        first_in_line = false;

        encode_vlq(&mut out, mapping.generated_column as i64 - prev_generated_column);
        encode_vlq(&mut out, mapping.source_index as i64 - prev_source);
        encode_vlq(&mut out, mapping.original_line as i64 - prev_original_line);
        encode_vlq(&mut out, mapping.original_column as i64 - prev_original_column);

        prev_generated_column = mapping.generated_column as i64;
        prev_source = mapping.source_index as i64;
        prev_original_line = mapping.original_line as i64;
        prev_original_column = mapping.original_column as i64;
    }

    out
}

fn encode_vlq(out: &mut String, value: i64) {
    let mut vlq = if value < 0 { ((-value) << 1) | 1 } else { value << 1 };
    loop {
        let mut digit = (vlq & 0b11111) as usize;
        vlq >>= 5;
        if vlq > 0 {
            digit |= 0b100000;
        }
        out.push(BASE64_ALPHABET[digit] as char);
        if vlq == 0 {
            break;
        }
    }
}

/// Comment pointing at an external or inline map
pub fn script_map_comment(url: &str) -> String {
    format!("//# sourceMappingURL={}", url)
}

pub fn style_map_comment(url: &str) -> String {
    format!("/*# sourceMappingURL={} */", url)
}
