//! A project on disk and shell-script stand-ins for the external tools.
//!
//! The scripts take the same arguments as the real tools and react to
//! markers in the scene text: `SLOW` blocks until killed, `FAIL` fails the
//! way the real tool does, `NOOUT` exits cleanly without writing anything.
//! The clip and render tools instead look for `slow_clip` and `slow_render`
//! files in the project root.

use kodan_jobs::{Pipeline, PipelineConfig, ToolCommand};
use kodan_project::{Project, ProjectHandle, ProjectStore, Scene, ScenePatch, StoreKind};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const IMAGE_TOOL: &str = r#"
out="$1"
case "$3" in *SLOW*) exec sleep 30 ;; esac
case "$3" in *FAIL*) echo "CUDA out of memory" >&2; exit 1 ;; esac
echo 'PROGRESS: 1/2'
echo '100%|##########' >&2
printf 'image' > "$out"
"#;

const VOICE_TOOL: &str = r#"
case "$1" in *SLOW*) exec sleep 30 ;; esac
case "$1" in *NOOUT*) exit 0 ;; esac
printf 'voice' > "$2"
"#;

const CAPTION_TOOL: &str = r#"
case "$3" in *SLOW*) exec sleep 30 ;; esac
case "$3" in *FAIL*) echo "font not found" >&2; exit 0 ;; esac
cp "$1" "$2" && printf '+%s' "$3" >> "$2"
echo "High-resolution caption generated successfully" >&2
"#;

const CLIP_TOOL: &str = r#"
echo "$2" >> "$1/clip_runs.log"
if [ -f "$1/slow_clip" ]; then sleep 1; fi
cat "$1/Images/$2.png" "$1/Voicelines/$2.mp3" > "$1/Clips/$2.mp4"
"#;

const RENDER_TOOL: &str = r#"
if [ -f "$1/slow_render" ]; then exec sleep 30; fi
for clip in $(ls "$1/Clips" | sort -n); do cat "$1/Clips/$clip"; done > "$2"
"#;

pub struct Fixture {
    pub tmp: TempDir,
    pub handle: ProjectHandle,
    pub config: PipelineConfig,
}

impl Fixture {
    /// A project with `scenes` empty scenes and no files.
    pub fn new(scenes: usize) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("Projects").join("fixture");
        fs::create_dir_all(&root).unwrap();
        let handle = ProjectHandle::new(&root);
        handle.layout().ensure_dirs().unwrap();

        let mut project = Project::new("Fixture");
        project.scenes = (0..scenes).map(|_| Scene::new()).collect();
        ProjectStore::new(handle.clone()).save(&project).unwrap();

        let tools = tmp.path().join("tools");
        fs::create_dir_all(&tools).unwrap();
        let tool = |name: &str, body: &str| {
            let script = tools.join(name);
            fs::write(&script, body).unwrap();
            ToolCommand::new("/bin/sh", [script.to_string_lossy().into_owned()])
        };
        let config = PipelineConfig {
            image: tool("image.sh", IMAGE_TOOL),
            voice: tool("voice.sh", VOICE_TOOL),
            caption: tool("caption.sh", CAPTION_TOOL),
            clip: tool("clip.sh", CLIP_TOOL),
            render: tool("render.sh", RENDER_TOOL),
            voices_dir: tmp.path().join("voices"),
            ..PipelineConfig::default()
        };

        Self {
            tmp,
            handle,
            config,
        }
    }

    pub fn root(&self) -> &Path {
        self.handle.root()
    }

    pub fn open(&self) -> Pipeline {
        Pipeline::open(self.handle.clone(), self.config.clone()).unwrap()
    }

    pub fn set(&self, position: usize, patch: ScenePatch) {
        ProjectStore::new(self.handle.clone())
            .update_scene(position, patch)
            .unwrap();
    }

    pub fn path(&self, kind: StoreKind, position: usize) -> PathBuf {
        self.handle.layout().path_for(kind, position)
    }

    pub fn write(&self, kind: StoreKind, position: usize, content: &str) {
        fs::write(self.path(kind, position), content).unwrap();
    }

    pub fn read(&self, kind: StoreKind, position: usize) -> Option<String> {
        fs::read_to_string(self.path(kind, position)).ok()
    }

    /// Number of times the clip tool has run.
    pub fn clip_runs(&self) -> usize {
        fs::read_to_string(self.root().join("clip_runs.log"))
            .map(|log| log.lines().count())
            .unwrap_or(0)
    }
}
