use rustc_hash::FxHashMap;

use comfygit_types::Criticality;

/// File extensions treated as model references when they appear in a
/// widget value.
pub const DEFAULT_MODEL_EXTENSIONS: &[&str] = &[
    ".safetensors",
    ".sft",
    ".ckpt",
    ".pt",
    ".pth",
    ".bin",
    ".onnx",
    ".gguf",
];

/// Node types the host ships with. Anything else is a custom node that
/// some plugin package must provide.
pub const BUILTIN_NODE_TYPES: &[&str] = &[
    "CheckpointLoaderSimple",
    "CheckpointLoader",
    "CheckpointSave",
    "CLIPLoader",
    "CLIPSetLastLayer",
    "CLIPTextEncode",
    "CLIPVisionEncode",
    "CLIPVisionLoader",
    "ConditioningAverage",
    "ConditioningCombine",
    "ConditioningConcat",
    "ConditioningSetArea",
    "ControlNetApply",
    "ControlNetApplyAdvanced",
    "ControlNetLoader",
    "DualCLIPLoader",
    "EmptyImage",
    "EmptyLatentImage",
    "GLIGENLoader",
    "GLIGENTextBoxApply",
    "ImageBatch",
    "ImageInvert",
    "ImagePadForOutpaint",
    "ImageScale",
    "ImageScaleBy",
    "ImageUpscaleWithModel",
    "InpaintModelConditioning",
    "KSampler",
    "KSamplerAdvanced",
    "LatentComposite",
    "LatentFlip",
    "LatentRotate",
    "LatentUpscale",
    "LatentUpscaleBy",
    "LoadImage",
    "LoadImageMask",
    "LoraLoader",
    "LoraLoaderModelOnly",
    "PreviewImage",
    "SaveImage",
    "StyleModelApply",
    "StyleModelLoader",
    "UNETLoader",
    "UpscaleModelLoader",
    "VAEDecode",
    "VAEEncode",
    "VAEEncodeForInpaint",
    "VAELoader",
];

/// A builtin loader's implicit base directories and the widget slot that
/// holds the model path.
#[derive(Debug, Clone)]
struct LoaderMapping {
    directories: &'static [&'static str],
    widget_index: usize,
}

/// Builtin loader node configuration: which directories the host scans
/// for each loader, and where the model path lives in `widgets_values`.
///
/// The host prepends the base directory to the widget value at load time,
/// so the widget value must not include it; custom nodes get no such
/// treatment and their widget values are left exactly as authored.
#[derive(Debug)]
pub struct ModelPathConfig {
    loaders: FxHashMap<&'static str, LoaderMapping>,
    extensions: Vec<String>,
}

impl Default for ModelPathConfig {
    fn default() -> Self {
        let mut loaders = FxHashMap::default();
        let mut insert = |node_type: &'static str,
                          directories: &'static [&'static str],
                          widget_index: usize| {
            loaders.insert(
                node_type,
                LoaderMapping {
                    directories,
                    widget_index,
                },
            );
        };
        insert("CheckpointLoaderSimple", &["checkpoints"], 0);
        insert("CheckpointLoader", &["checkpoints"], 0);
        insert("VAELoader", &["vae"], 0);
        insert("LoraLoader", &["loras"], 0);
        insert("LoraLoaderModelOnly", &["loras"], 0);
        insert("CLIPLoader", &["text_encoders", "clip"], 0);
        insert("DualCLIPLoader", &["text_encoders", "clip"], 0);
        insert("UNETLoader", &["diffusion_models", "unet"], 0);
        insert("ControlNetLoader", &["controlnet"], 0);
        insert("CLIPVisionLoader", &["clip_vision"], 0);
        insert("StyleModelLoader", &["style_models"], 0);
        insert("UpscaleModelLoader", &["upscale_models"], 0);
        insert("GLIGENLoader", &["gligen"], 0);

        Self {
            loaders,
            extensions: DEFAULT_MODEL_EXTENSIONS
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

impl ModelPathConfig {
    /// Whether the node type is a builtin loader with an implicit base
    /// directory.
    pub fn is_model_loader_node(&self, node_type: &str) -> bool {
        self.loaders.contains_key(node_type)
    }

    /// The base directories the host scans for this loader.
    pub fn directories_for_node(&self, node_type: &str) -> &[&'static str] {
        self.loaders
            .get(node_type)
            .map(|mapping| mapping.directories)
            .unwrap_or(&[])
    }

    /// Which widget slot holds the model path for this loader.
    pub fn widget_index_for_node(&self, node_type: &str) -> usize {
        self.loaders
            .get(node_type)
            .map(|mapping| mapping.widget_index)
            .unwrap_or(0)
    }

    /// Whether a widget value looks like a model file reference.
    pub fn looks_like_model(&self, value: &str) -> bool {
        self.extensions.iter().any(|ext| value.ends_with(ext))
    }

    pub fn extensions(&self) -> Vec<&str> {
        self.extensions.iter().map(String::as_str).collect()
    }

    /// Strip the loader's implicit base directory from a path.
    ///
    /// Backslashes are normalized first; subdirectories below the base
    /// are preserved. A path without a known prefix (or a custom node
    /// type) is returned unchanged.
    pub fn strip_base_directory(&self, node_type: &str, relative_path: &str) -> String {
        let normalized = relative_path.replace('\\', "/");
        for base in self.directories_for_node(node_type) {
            if let Some(stripped) = normalized.strip_prefix(&format!("{base}/")) {
                return stripped.to_string();
            }
        }
        normalized
    }

    /// Candidate full paths for a loader widget value: one per base
    /// directory associated with the loader type.
    pub fn reconstruct_model_path(&self, node_type: &str, widget_value: &str) -> Vec<String> {
        let normalized = widget_value.replace('\\', "/");
        self.directories_for_node(node_type)
            .iter()
            .map(|base| format!("{base}/{normalized}"))
            .collect()
    }

    /// Smart default criticality for a model category.
    pub fn default_criticality(&self, category: &str) -> Criticality {
        match category {
            "checkpoints" | "vae" | "text_encoders" | "loras" | "style_models" | "embeddings"
            | "upscale_models" => Criticality::Flexible,
            "controlnet" | "clip_vision" => Criticality::Required,
            _ => Criticality::Required,
        }
    }

    /// The category a model slot belongs to: the loader's first mapped
    /// directory when the type is known, otherwise the path's first
    /// component, otherwise a guess from the filename.
    pub fn category_for_ref(&self, node_type: &str, widget_value: &str) -> String {
        if let Some(directory) = self.directories_for_node(node_type).first() {
            return (*directory).to_string();
        }
        let normalized = widget_value.replace('\\', "/");
        if let Some((first, _)) = normalized.split_once('/') {
            return first.to_string();
        }
        guess_category_from_filename(&normalized).to_string()
    }
}

fn guess_category_from_filename(filename: &str) -> &'static str {
    let lower = filename.to_lowercase();
    if lower.contains("lora") {
        "loras"
    } else if lower.contains("vae") {
        "vae"
    } else if lower.contains("controlnet") || lower.contains("control_") {
        "controlnet"
    } else if lower.contains("upscale") || lower.contains("esrgan") {
        "upscale_models"
    } else if lower.contains("clip") {
        "text_encoders"
    } else {
        "checkpoints"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_preserves_subdirectories() {
        let config = ModelPathConfig::default();
        assert_eq!(
            config.strip_base_directory("CheckpointLoaderSimple", "checkpoints/sd15/model.ckpt"),
            "sd15/model.ckpt"
        );
        assert_eq!(
            config.strip_base_directory("LoraLoader", "loras/style.safetensors"),
            "style.safetensors"
        );
        // Unknown prefix passes through.
        assert_eq!(
            config.strip_base_directory("CheckpointLoaderSimple", "elsewhere/model.ckpt"),
            "elsewhere/model.ckpt"
        );
    }

    #[test]
    fn strip_normalizes_backslashes() {
        let config = ModelPathConfig::default();
        assert_eq!(
            config.strip_base_directory("CheckpointLoaderSimple", r"checkpoints\sd15\model.ckpt"),
            "sd15/model.ckpt"
        );
    }

    #[test]
    fn reconstruction_inverts_stripping() {
        let config = ModelPathConfig::default();
        let original = "text_encoders/t5/clip_l.safetensors";
        let stripped = config.strip_base_directory("CLIPLoader", original);
        assert_ne!(stripped, original);
        assert!(config
            .reconstruct_model_path("CLIPLoader", &stripped)
            .contains(&original.to_string()));
    }

    #[test]
    fn category_falls_back_from_loader_to_path_to_guess() {
        let config = ModelPathConfig::default();
        assert_eq!(config.category_for_ref("VAELoader", "anything"), "vae");
        assert_eq!(
            config.category_for_ref("SomeCustomLoader", "upscale_models/rife49.pth"),
            "upscale_models"
        );
        assert_eq!(
            config.category_for_ref("SomeCustomLoader", "style_lora_v2.safetensors"),
            "loras"
        );
    }
}
