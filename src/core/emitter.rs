use crate::core::context::BuildContext;
use crate::core::interfaces::FileSystemService;
use crate::core::models::{ChunkKind, EmittedFile, EmittedFileSet, Graph, OutputChunk, SourceMapPolicy, TransformedOutput};
use crate::infrastructure::hmr_client::client_script;
use crate::utils::{script_map_comment, style_map_comment, BuildError, Logger, Result, SourceMap, Timer};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

pub const DOCUMENT_FILENAME: &str = "index.html";

/// Turns chunks into the complete in-memory file set, then optionally
/// writes it. Every name conflict is detected before anything touches disk.
pub struct OutputEmitter {
    context: Arc<BuildContext>,
}

impl OutputEmitter {
    pub fn new(context: Arc<BuildContext>) -> Self {
        Self { context }
    }

    pub fn render(&self, graph: &Graph, chunks: Vec<OutputChunk>) -> Result<EmittedFileSet> {
        let _timer = Timer::start("Rendering output");
        let mut files = FileTable::default();
        let mut rendered = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            let chunk = with_content_hash(chunk);
            let owner = describe(&chunk);
            let mut contents = chunk.contents.to_vec();

            if let Some(map) = &chunk.map {
                if let Some((map_name, map_file)) = self.attach_map(&chunk, map, &mut contents)? {
                    files.insert(map_name, map_file, &owner)?;
                }
            }

            files.insert(
                chunk.filename.clone(),
                EmittedFile {
                    kind: chunk.kind,
                    mime_type: chunk.kind.mime_type(&chunk.filename),
                    contents: Arc::new(contents),
                },
                &owner,
            )?;
            rendered.push(chunk);
        }

        let document = self.render_document(graph, &rendered);
        files.insert(
            DOCUMENT_FILENAME.to_string(),
            EmittedFile {
                kind: ChunkKind::Document,
                mime_type: ChunkKind::Document.mime_type(DOCUMENT_FILENAME),
                contents: Arc::new(document.into_bytes()),
            },
            "the HTML document",
        )?;

        Ok(EmittedFileSet {
            files: files.files,
            chunks: rendered,
        })
    }

    /// Writes every file below the output directory. With `clean`, the
    /// directory is emptied first; unrelated files survive otherwise.
    pub async fn write(&self, files: &EmittedFileSet, fs: &dyn FileSystemService) -> Result<()> {
        let _timer = Timer::start("Writing output files");
        let out = &self.context.output_dir;

        if self.context.clean {
            Logger::debug(&format!("🧹 Cleaning {}", out.display()));
            fs.remove_directory(out).await?;
        }
        fs.create_directory(out).await?;

        futures::future::try_join_all(
            files
                .files
                .iter()
                .map(|(name, file)| async move { fs.write_file(&out.join(name), &file.contents).await }),
        )
        .await?;

        Ok(())
    }

    /// Appends the map reference to `contents`; returns the `.map` file when
    /// maps are external
    fn attach_map(&self, chunk: &OutputChunk, map: &SourceMap, contents: &mut Vec<u8>) -> Result<Option<(String, EmittedFile)>> {
        let comment: fn(&str) -> String = match chunk.kind {
            ChunkKind::Script => script_map_comment,
            ChunkKind::Stylesheet => style_map_comment,
            _ => return Ok(None),
        };

        let basename = Path::new(&chunk.filename)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| chunk.filename.clone());
        let mut map = map.clone();
        map.file = Some(basename.clone());

        let (url, file) = match self.context.source_maps {
            SourceMapPolicy::Disabled => return Ok(None),
            SourceMapPolicy::Inline => (map.to_data_url()?, None),
            SourceMapPolicy::External => {
                let map_name = format!("{}.map", chunk.filename);
                let file = EmittedFile {
                    kind: ChunkKind::SourceMap,
                    mime_type: ChunkKind::SourceMap.mime_type(&map_name),
                    contents: Arc::new(map.to_json()?.into_bytes()),
                };
                (format!("{}.map", basename), Some((map_name, file)))
            }
        };

        if !contents.ends_with(b"\n") {
            contents.push(b'\n');
        }
        contents.extend_from_slice(comment(&url).as_bytes());
        contents.push(b'\n');
        Ok(file)
    }

    fn render_document(&self, graph: &Graph, chunks: &[OutputChunk]) -> String {
        let context = &self.context;
        let mut head = Vec::new();
        let mut body = Vec::new();

        if let Some(favicon) = context
            .favicon
            .as_deref()
            .and_then(|path| graph.node_for_path(path))
            .and_then(|node| match &node.output {
                Some(TransformedOutput::Copy { target, .. }) => Some(target),
                _ => None,
            })
        {
            head.push(format!(r#"<link rel="icon" href="{}">"#, context.public_url(favicon)));
        }

        for chunk in chunks {
            let url = context.public_url(&chunk.filename);
            match chunk.kind {
                ChunkKind::Stylesheet if context.mode.is_production() => {
                    head.push(format!(r#"<link rel="stylesheet" href="{}">"#, url))
                }
                ChunkKind::Stylesheet => head.push(format!(
                    r#"<link rel="stylesheet" href="{}" data-kiln-style="{}">"#,
                    url, chunk.name
                )),
                ChunkKind::BinaryModule => head.push(format!(
                    r#"<link rel="preload" href="{}" as="fetch" type="application/wasm" crossorigin>"#,
                    url
                )),
                ChunkKind::Script => body.push(format!(r#"<script type="module" src="{}"></script>"#, url)),
                _ => {}
            }
        }

        if !context.mode.is_production() && context.hot_reload {
            body.push(format!("<script>\n{}\n</script>", client_script(context.hmr_port())));
        }

        match &graph.template {
            Some(template) => inject(template, &head, &body),
            None => generated_document(graph, &head, &body),
        }
    }
}

/// Emitted files keyed by name, remembering who produced each
#[derive(Default)]
struct FileTable {
    files: BTreeMap<String, EmittedFile>,
    owners: HashMap<String, String>,
}

impl FileTable {
    fn insert(&mut self, filename: String, file: EmittedFile, owner: &str) -> Result<()> {
        if let Some(first) = self.owners.get(&filename) {
            return Err(BuildError::FilenameCollision {
                filename,
                first: first.clone(),
                second: owner.to_string(),
            }
            .into());
        }
        self.owners.insert(filename.clone(), owner.to_string());
        self.files.insert(filename, file);
        Ok(())
    }
}

fn describe(chunk: &OutputChunk) -> String {
    match chunk.members.as_slice() {
        [single] => single.to_string(),
        _ => format!("{:?} chunk '{}'", chunk.kind, chunk.name),
    }
}

fn with_content_hash(mut chunk: OutputChunk) -> OutputChunk {
    if chunk.filename.contains("[hash]") {
        let digest = blake3::hash(&chunk.contents).to_hex();
        chunk.filename = chunk.filename.replace("[hash]", &digest[..8]);
    }
    chunk
}

/// Places head tags before `</head>` and body tags before `</body>`;
/// whatever has no closing tag to go before is appended
fn inject(template: &str, head: &[String], body: &[String]) -> String {
    let mut html = template.to_string();
    let mut trailing = Vec::new();

    for (tag, lines) in [("</head>", head), ("</body>", body)] {
        if lines.is_empty() {
            continue;
        }
        let block = format!("{}\n", lines.join("\n"));
        match html.to_ascii_lowercase().rfind(tag) {
            Some(at) => html.insert_str(at, &block),
            None => trailing.push(block),
        }
    }

    for block in trailing {
        if !html.ends_with('\n') {
            html.push('\n');
        }
        html.push_str(&block);
    }
    html
}

fn generated_document(graph: &Graph, head: &[String], body: &[String]) -> String {
    let title = graph.entries.first().map(|(name, _)| name.as_str()).unwrap_or("app");
    let mut html = String::from("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    html.push_str(&format!("<title>{}</title>\n", title));
    for line in head {
        html.push_str(line);
        html.push('\n');
    }
    html.push_str("</head>\n<body>\n");
    for line in body {
        html.push_str(line);
        html.push('\n');
    }
    html.push_str("</body>\n</html>\n");
    html
}
