//! Texture loading and the indexed texture cache

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::error::{RendererError, RendererResult};
use image::{DynamicImage, GenericImageView};
use std::collections::HashMap;
use std::path::Path;

/// Key of the fallback texture created when nothing else was loaded
const DEFAULT_TEXTURE_KEY: &str = "<default white>";

/// Loaded texture data
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub data: Vec<u8>,
    pub name: String,
}

impl TextureData {
    /// Load texture from file
    pub fn from_file<P: AsRef<Path>>(path: P, format: TextureFormat) -> Result<Self, String> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        let img = image::open(path).map_err(|e| format!("{}: {}", path.display(), e))?;
        Ok(Self::from_image(img, &name, format))
    }

    /// Load texture from encoded bytes
    pub fn from_bytes(bytes: &[u8], name: &str, format: TextureFormat) -> Result<Self, String> {
        let img = image::load_from_memory(bytes).map_err(|e| e.to_string())?;
        Ok(Self::from_image(img, name, format))
    }

    fn from_image(img: DynamicImage, name: &str, format: TextureFormat) -> Self {
        let (width, height) = img.dimensions();
        let data = img.to_rgba8().into_raw();

        Self {
            width,
            height,
            format,
            data,
            name: name.to_string(),
        }
    }

    /// Create a solid color texture
    pub fn solid_color(color: [u8; 4], name: &str) -> Self {
        Self {
            width: 1,
            height: 1,
            format: TextureFormat::Rgba8UnormSrgb,
            data: color.to_vec(),
            name: name.to_string(),
        }
    }

    /// Create a default white texture
    pub fn white() -> Self {
        Self::solid_color([255, 255, 255, 255], "white")
    }
}

/// GPU texture with its sampling view
pub struct GpuTexture {
    pub handle: TextureHandle,
    pub view: TextureViewHandle,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub name: String,
}

impl GpuTexture {
    /// Create and upload texture to GPU
    pub fn create<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        data: &TextureData,
    ) -> BackendResult<Self> {
        let handle = backend.create_texture(&TextureDescriptor {
            label: Some(data.name.clone()),
            width: data.width,
            height: data.height,
            format: data.format,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
            ..Default::default()
        })?;

        let view = backend.create_texture_view(handle, &TextureViewDescriptor::default())?;
        backend.write_texture(handle, &data.data, data.width, data.height);

        Ok(Self {
            handle,
            view,
            width: data.width,
            height: data.height,
            format: data.format,
            name: data.name.clone(),
        })
    }

    pub fn destroy<B: GraphicsBackend + ?Sized>(&self, backend: &mut B) {
        backend.destroy_texture_view(self.view);
        backend.destroy_texture(self.handle);
    }
}

/// Uploaded textures keyed by path; insertion order is the texture array index
#[derive(Default)]
pub struct TextureCache {
    textures: Vec<GpuTexture>,
    positions: HashMap<String, usize>,
}

impl TextureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    /// Array index of a cached texture
    pub fn position(&self, key: &str) -> Option<usize> {
        self.positions.get(key.trim()).copied()
    }

    /// Index of `path`, decoding and uploading it on first use.
    ///
    /// Returns `Ok(None)` for an empty path.
    pub fn get_or_load<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        path: &str,
        format: TextureFormat,
    ) -> RendererResult<Option<usize>> {
        let key = path.trim();
        if key.is_empty() {
            return Ok(None);
        }
        if let Some(index) = self.position(key) {
            return Ok(Some(index));
        }

        log::debug!("loading texture {}", key);
        let data = TextureData::from_file(key, format).map_err(RendererError::Texture)?;
        self.insert(backend, key, &data).map(Some)
    }

    /// Register in-memory texture data under `key`
    pub fn insert<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        key: &str,
        data: &TextureData,
    ) -> RendererResult<usize> {
        let key = key.trim();
        if let Some(index) = self.position(key) {
            return Ok(index);
        }

        let texture = GpuTexture::create(backend, data)?;
        let index = self.textures.len();
        self.textures.push(texture);
        self.positions.insert(key.to_string(), index);
        Ok(index)
    }

    /// Start assigning array indices for textures a model set will use.
    ///
    /// Nothing is decoded or uploaded until the plan is passed to [`Self::load_planned`].
    pub fn plan(&self, capacity: usize) -> TexturePlan {
        TexturePlan {
            capacity,
            next: self.textures.len(),
            positions: self.positions.clone(),
            pending: Vec::new(),
        }
    }

    /// Decode every planned texture, then upload them in index order.
    ///
    /// A file that fails to decode leaves the cache unchanged.
    pub fn load_planned<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        plan: TexturePlan,
    ) -> RendererResult<()> {
        let decoded = plan
            .pending
            .into_iter()
            .map(|(key, format)| {
                log::debug!("loading texture {}", key);
                TextureData::from_file(&key, format)
                    .map(|data| (key, data))
                    .map_err(RendererError::Texture)
            })
            .collect::<RendererResult<Vec<_>>>()?;

        for (key, data) in decoded {
            self.insert(backend, &key, &data)?;
        }
        Ok(())
    }

    /// Make sure the texture array has something to bind
    pub fn ensure_default<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        default_path: Option<&str>,
    ) -> RendererResult<()> {
        if !self.is_empty() {
            return Ok(());
        }
        match default_path {
            Some(path) if !path.trim().is_empty() => {
                self.get_or_load(backend, path, TextureFormat::Rgba8UnormSrgb)?;
            }
            _ => {
                self.insert(backend, DEFAULT_TEXTURE_KEY, &TextureData::white())?;
            }
        }
        Ok(())
    }

    /// Exactly `count` views, padding past the last texture by repeating it
    pub fn bindings(&self, count: usize) -> Vec<TextureViewHandle> {
        let Some(last) = self.textures.last() else {
            return Vec::new();
        };
        if self.textures.len() > count {
            log::warn!(
                "{} textures loaded but only {} can be bound",
                self.textures.len(),
                count
            );
        }
        self.textures
            .iter()
            .map(|t| t.view)
            .chain(std::iter::repeat(last.view))
            .take(count)
            .collect()
    }

    pub fn destroy<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B) {
        for texture in self.textures.drain(..) {
            texture.destroy(backend);
        }
        self.positions.clear();
    }
}

/// Texture indices claimed ahead of loading, see [`TextureCache::plan`]
#[derive(Debug)]
pub struct TexturePlan {
    capacity: usize,
    next: usize,
    positions: HashMap<String, usize>,
    pending: Vec<(String, TextureFormat)>,
}

impl TexturePlan {
    /// Index `path` will have once loaded; `None` for an empty path.
    ///
    /// Fails with `CapacityExceeded` when a new texture doesn't fit the texture array.
    pub fn reserve(&mut self, path: &str, format: TextureFormat) -> RendererResult<Option<usize>> {
        let key = path.trim();
        if key.is_empty() {
            return Ok(None);
        }
        if let Some(&index) = self.positions.get(key) {
            return Ok(Some(index));
        }
        if self.next >= self.capacity {
            return Err(RendererError::CapacityExceeded {
                region: "textures",
                requested: self.next as u64 + 1,
                available: self.capacity as u64,
            });
        }

        let index = self.next;
        self.next += 1;
        self.positions.insert(key.to_string(), index);
        self.pending.push((key.to_string(), format));
        Ok(Some(index))
    }

    /// Textures the plan will decode and upload
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessBackend;

    #[test]
    fn test_insertion_order_defines_index() {
        let mut backend = HeadlessBackend::new(4, 4);
        let mut cache = TextureCache::new();

        let red = TextureData::solid_color([255, 0, 0, 255], "red");
        let blue = TextureData::solid_color([0, 0, 255, 255], "blue");
        assert_eq!(cache.insert(&mut backend, "red.png", &red).unwrap(), 0);
        assert_eq!(cache.insert(&mut backend, "blue.png", &blue).unwrap(), 1);
        assert_eq!(cache.insert(&mut backend, " red.png ", &red).unwrap(), 0);

        assert_eq!(cache.position("blue.png"), Some(1));
        assert_eq!(cache.position("green.png"), None);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_empty_path_loads_nothing() {
        let mut backend = HeadlessBackend::new(4, 4);
        let mut cache = TextureCache::new();
        let loaded = cache
            .get_or_load(&mut backend, "  ", TextureFormat::Rgba8Unorm)
            .unwrap();
        assert!(loaded.is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_missing_file_is_a_texture_error() {
        let mut backend = HeadlessBackend::new(4, 4);
        let mut cache = TextureCache::new();
        let result = cache.get_or_load(&mut backend, "does/not/exist.png", TextureFormat::Rgba8Unorm);
        assert!(matches!(result, Err(RendererError::Texture(_))));
    }

    #[test]
    fn test_bindings_pad_with_last_texture() {
        let mut backend = HeadlessBackend::new(4, 4);
        let mut cache = TextureCache::new();
        assert!(cache.bindings(4).is_empty());

        cache.ensure_default(&mut backend, None).unwrap();
        cache
            .insert(&mut backend, "second", &TextureData::white())
            .unwrap();

        let views = cache.bindings(5);
        assert_eq!(views.len(), 5);
        assert_ne!(views[0], views[1]);
        assert!(views[1..].iter().all(|v| *v == views[1]));
    }

    fn write_png(name: &str) -> String {
        let path = std::env::temp_dir().join(format!("skinned-renderer-{}-{}.png", std::process::id(), name));
        image::RgbaImage::from_pixel(2, 2, image::Rgba([10, 20, 30, 255]))
            .save(&path)
            .unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_plan_assigns_indices_after_cached_textures() {
        let mut backend = HeadlessBackend::new(4, 4);
        let mut cache = TextureCache::new();
        cache.ensure_default(&mut backend, None).unwrap();

        let mut plan = cache.plan(4);
        let format = TextureFormat::Rgba8Unorm;
        assert_eq!(plan.reserve("a.png", format).unwrap(), Some(1));
        assert_eq!(plan.reserve("b.png", format).unwrap(), Some(2));
        assert_eq!(plan.reserve(" a.png", format).unwrap(), Some(1));
        assert_eq!(plan.reserve("", format).unwrap(), None);
        assert_eq!(plan.pending_count(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_plan_rejects_textures_past_capacity() {
        let mut backend = HeadlessBackend::new(4, 4);
        let mut cache = TextureCache::new();
        cache.ensure_default(&mut backend, None).unwrap();

        let mut plan = cache.plan(2);
        let format = TextureFormat::Rgba8Unorm;
        assert_eq!(plan.reserve("a.png", format).unwrap(), Some(1));
        assert!(matches!(
            plan.reserve("b.png", format),
            Err(RendererError::CapacityExceeded {
                region: "textures",
                requested: 3,
                available: 2
            })
        ));
        // Already planned textures don't need another slot
        assert_eq!(plan.reserve("a.png", format).unwrap(), Some(1));
    }

    #[test]
    fn test_load_planned_uploads_in_index_order() {
        let mut backend = HeadlessBackend::new(4, 4);
        let mut cache = TextureCache::new();
        let first = write_png("first");
        let second = write_png("second");

        let mut plan = cache.plan(8);
        plan.reserve(&first, TextureFormat::Rgba8UnormSrgb).unwrap();
        plan.reserve(&second, TextureFormat::Rgba8Unorm).unwrap();
        cache.load_planned(&mut backend, plan).unwrap();

        assert_eq!(cache.position(&first), Some(0));
        assert_eq!(cache.position(&second), Some(1));
        assert_eq!(backend.live_texture_count(), 2);
    }

    #[test]
    fn test_load_planned_decode_failure_keeps_cache() {
        let mut backend = HeadlessBackend::new(4, 4);
        let mut cache = TextureCache::new();
        let good = write_png("good");

        let mut plan = cache.plan(8);
        plan.reserve(&good, TextureFormat::Rgba8Unorm).unwrap();
        plan.reserve("does/not/exist.png", TextureFormat::Rgba8Unorm).unwrap();
        let result = cache.load_planned(&mut backend, plan);

        assert!(matches!(result, Err(RendererError::Texture(_))));
        assert!(cache.is_empty());
        assert_eq!(backend.live_texture_count(), 0);
    }
}
