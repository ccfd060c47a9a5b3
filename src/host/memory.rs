//! 内存版演示宿主
//!
//! 一个只有单个场景的极简编辑器：对象的增删、选择、保存。供命令行演示与测试使用；
//! 真正的宿主只需实现 HostOperations / HostEnvironment。

use std::sync::Mutex;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{
    Affinity, HostEnvironment, HostIdentity, HostOperations, HostSummary, OperationDescriptor,
    SnapshotDescriptor,
};
use crate::protocol::ContentBlock;
use crate::tools::schema::schema_of;

pub const SCENE_URI: &str = "host://scene";
pub const SELECTION_URI: &str = "host://selection";

/// 摘要中最多列出的对象名
const SUMMARY_NAME_LIMIT: usize = 20;

#[derive(Debug, Clone)]
struct SceneObject {
    name: String,
    kind: String,
    position: [f64; 3],
}

#[derive(Debug)]
struct SceneState {
    scene_name: String,
    objects: Vec<SceneObject>,
    selection: Vec<String>,
    saved_as: Option<String>,
}

/// 演示宿主
pub struct InMemoryHost {
    state: Mutex<SceneState>,
    /// 只读模式下保存会以权限错误失败
    read_only: bool,
}

#[derive(Deserialize, JsonSchema)]
struct CreateSceneArgs {
    /// Name of the new scene
    name: String,
}

#[derive(Deserialize, JsonSchema)]
struct CreateObjectArgs {
    /// Object name, unique within the scene
    name: String,
    /// Object kind: cube, sphere, light, camera or empty
    #[serde(default = "default_kind")]
    kind: String,
    /// Position as [x, y, z]
    #[serde(default)]
    position: Option<[f64; 3]>,
}

fn default_kind() -> String {
    "empty".to_string()
}

#[derive(Deserialize, JsonSchema)]
struct NameArgs {
    /// Name of the target object
    name: String,
}

#[derive(Deserialize, JsonSchema)]
struct SaveSceneArgs {
    /// Destination path, defaults to <scene name>.scene
    #[serde(default)]
    path: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
struct NoArgs {}

fn parse<T: for<'de> Deserialize<'de>>(args: &Value) -> Result<T, String> {
    serde_json::from_value(args.clone()).map_err(|e| format!("Invalid arguments: {}", e))
}

impl InMemoryHost {
    pub fn new(scene_name: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(SceneState {
                scene_name: scene_name.into(),
                objects: Vec::new(),
                selection: Vec::new(),
                saved_as: None,
            }),
            read_only: false,
        }
    }

    /// 只读宿主：save_scene 返回权限错误
    pub fn read_only(scene_name: impl Into<String>) -> Self {
        Self {
            read_only: true,
            ..Self::new(scene_name)
        }
    }

    pub fn rename_scene(&self, name: &str) {
        self.lock().scene_name = name.to_string();
    }

    pub fn object_names(&self) -> Vec<String> {
        self.lock().objects.iter().map(|o| o.name.clone()).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SceneState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn create_scene(&self, args: CreateSceneArgs) -> Result<String, String> {
        let name = args.name.trim();
        if name.is_empty() {
            return Err("Scene name must not be empty".to_string());
        }
        let mut state = self.lock();
        state.scene_name = name.to_string();
        state.objects.clear();
        state.selection.clear();
        state.saved_as = None;
        Ok(format!("Created scene '{}'", name))
    }

    fn create_object(&self, args: CreateObjectArgs) -> Result<String, String> {
        let mut state = self.lock();
        if state.objects.iter().any(|o| o.name == args.name) {
            return Err(format!("Object '{}' already exists", args.name));
        }
        let position = args.position.unwrap_or([0.0, 0.0, 0.0]);
        state.objects.push(SceneObject {
            name: args.name.clone(),
            kind: args.kind.clone(),
            position,
        });
        Ok(format!(
            "Created {} '{}' at ({}, {}, {})",
            args.kind, args.name, position[0], position[1], position[2]
        ))
    }

    fn delete_object(&self, args: NameArgs) -> Result<String, String> {
        let mut state = self.lock();
        let before = state.objects.len();
        state.objects.retain(|o| o.name != args.name);
        if state.objects.len() == before {
            return Err(format!("Object '{}' not found", args.name));
        }
        state.selection.retain(|n| n != &args.name);
        Ok(format!("Deleted '{}'", args.name))
    }

    fn select_object(&self, args: NameArgs) -> Result<String, String> {
        let mut state = self.lock();
        if !state.objects.iter().any(|o| o.name == args.name) {
            return Err(format!("Object '{}' not found", args.name));
        }
        state.selection = vec![args.name.clone()];
        Ok(format!("Selected '{}'", args.name))
    }

    fn list_objects(&self) -> Result<String, String> {
        let state = self.lock();
        if state.objects.is_empty() {
            return Ok(format!("Scene '{}' is empty", state.scene_name));
        }
        let lines: Vec<String> = state
            .objects
            .iter()
            .map(|o| format!("- {} ({})", o.name, o.kind))
            .collect();
        Ok(format!("Scene '{}':\n{}", state.scene_name, lines.join("\n")))
    }

    fn save_scene(&self, args: SaveSceneArgs) -> Result<String, String> {
        if self.read_only {
            return Err("Permission denied: document is read-only".to_string());
        }
        let mut state = self.lock();
        let path = args
            .path
            .unwrap_or_else(|| format!("{}.scene", state.scene_name));
        state.saved_as = Some(path.clone());
        Ok(format!("Saved scene to {}", path))
    }
}

impl HostOperations for InMemoryHost {
    fn operations(&self) -> Vec<OperationDescriptor> {
        let op = |name: &str, description: &str, schema: Value, affinity, touches: &[&str]| {
            OperationDescriptor {
                name: name.to_string(),
                description: description.to_string(),
                input_schema: schema,
                affinity,
                touches: touches.iter().map(|s| s.to_string()).collect(),
            }
        };
        vec![
            op(
                "create_scene",
                "Create a new empty scene and make it current.",
                schema_of::<CreateSceneArgs>(),
                Affinity::Main,
                &[SCENE_URI, SELECTION_URI],
            ),
            op(
                "create_object",
                "Create an object (cube, sphere, light, camera, empty) in the current scene.",
                schema_of::<CreateObjectArgs>(),
                Affinity::Main,
                &[SCENE_URI],
            ),
            op(
                "delete_object",
                "Delete an object from the current scene by name.",
                schema_of::<NameArgs>(),
                Affinity::Main,
                &[SCENE_URI, SELECTION_URI],
            ),
            op(
                "select_object",
                "Select an object by name.",
                schema_of::<NameArgs>(),
                Affinity::Main,
                &[SELECTION_URI],
            ),
            op(
                "list_objects",
                "List the objects in the current scene.",
                schema_of::<NoArgs>(),
                Affinity::Background,
                &[],
            ),
            op(
                "save_scene",
                "Save the current scene to disk.",
                schema_of::<SaveSceneArgs>(),
                Affinity::Main,
                &[],
            ),
        ]
    }

    fn execute(&self, name: &str, args: &Value) -> Result<Vec<ContentBlock>, String> {
        let text = match name {
            "create_scene" => self.create_scene(parse(args)?),
            "create_object" => self.create_object(parse(args)?),
            "delete_object" => self.delete_object(parse(args)?),
            "select_object" => self.select_object(parse(args)?),
            "list_objects" => self.list_objects(),
            "save_scene" => self.save_scene(parse(args)?),
            other => Err(format!("Unknown operation: {}", other)),
        }?;
        Ok(vec![ContentBlock::text(text)])
    }

    fn snapshots(&self) -> Vec<SnapshotDescriptor> {
        vec![
            SnapshotDescriptor {
                name: "scene".to_string(),
                uri: SCENE_URI.to_string(),
                description: "Current scene with its objects".to_string(),
            },
            SnapshotDescriptor {
                name: "selection".to_string(),
                uri: SELECTION_URI.to_string(),
                description: "Currently selected objects".to_string(),
            },
        ]
    }

    fn read_snapshot(&self, name: &str) -> Result<Value, String> {
        let state = self.lock();
        match name {
            "scene" => Ok(json!({
                "name": state.scene_name,
                "savedAs": state.saved_as,
                "objects": state.objects.iter().map(|o| json!({
                    "name": o.name,
                    "kind": o.kind,
                    "position": o.position,
                })).collect::<Vec<_>>(),
            })),
            "selection" => Ok(json!({ "selection": state.selection })),
            other => Err(format!("Unknown snapshot: {}", other)),
        }
    }
}

impl HostEnvironment for InMemoryHost {
    fn identity(&self) -> HostIdentity {
        HostIdentity {
            host_name: "stagehand-sim".to_string(),
            environment_version: env!("CARGO_PKG_VERSION").to_string(),
            document_name: self.lock().scene_name.clone(),
        }
    }

    fn summary(&self) -> HostSummary {
        let state = self.lock();
        HostSummary {
            document_name: state.scene_name.clone(),
            object_count: state.objects.len(),
            object_names: state
                .objects
                .iter()
                .take(SUMMARY_NAME_LIMIT)
                .map(|o| o.name.clone())
                .collect(),
            selection: state.selection.clone(),
        }
    }
}
