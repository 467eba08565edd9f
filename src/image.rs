//! An image together with everything needed to calibrate it.
use std::path::{Path, PathBuf};

use anyhow::Result;
use log::{info, warn};
use ndarray::{s, Array3, ArrayView2, Axis};

use crate::{
    loader::{resolve_path, ImageLoader, LoadedImage, TagTable, TiffLoader},
    metadata::MetadataView,
    microscope::{detect, image_rows, Microscope},
    ocr::{Tesseract, TextRecognizer},
    prompt::{Console, Prompt},
    render::{self, check_overwrite, ExportOptions, Exported, Preprocess},
    resolver::{resolve, Context, PixelSize, ResolveOptions, Resolution, ScaleBarReading},
};

/// Pixel data split into image and databar, the instrument it
/// came from, and a cached pixel size.
///
/// Resolving the pixel size may ask questions through the
/// [`Prompt`] (a [`Console`] by default) and read the databar
/// with the [`TextRecognizer`] (a [`Tesseract`] by default).
pub struct CalibratedImage {
    frames: Array3<f64>,
    /// Rows of each frame above the databar.
    rows: usize,
    microscope: Box<dyn Microscope>,
    tags: TagTable,
    raw: Vec<u8>,
    source: Option<PathBuf>,
    resolution: Option<Resolution>,
    pub resolve_options: ResolveOptions,
    prompt: Box<dyn Prompt>,
    recognizer: Box<dyn TextRecognizer>,
}

impl CalibratedImage {
    /// Open a TIFF file and detect the instrument that wrote it.
    /// A missing `.tif` extension is added.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = resolve_path(path.as_ref())?;
        let loaded = TiffLoader.load(&path)?;
        let microscope = detect(&loaded.raw);
        info!("{} looks like a {} image", path.display(), microscope.name());
        let mut image = Self::from_loaded(loaded, microscope);
        image.source = Some(path);
        Ok(image)
    }

    pub fn open_with<P: AsRef<Path>>(
        path: P,
        microscope: Box<dyn Microscope>,
        loader: &dyn ImageLoader,
    ) -> Result<Self> {
        let path = resolve_path(path.as_ref())?;
        let mut image = Self::from_loaded(loader.load(&path)?, microscope);
        image.source = Some(path);
        Ok(image)
    }

    pub fn from_loaded(loaded: LoadedImage, microscope: Box<dyn Microscope>) -> Self {
        Self::from_parts(loaded.frames, loaded.tags, loaded.raw, microscope)
    }

    /// `frames` is frame × height × width. An empty stack is
    /// replaced by a single blank frame.
    pub fn from_parts(
        frames: Array3<f64>,
        tags: TagTable,
        raw: Vec<u8>,
        microscope: Box<dyn Microscope>,
    ) -> Self {
        let (count, height, width) = frames.dim();
        let frames = if count == 0 {
            warn!("image has no frames");
            Array3::zeros((1, height, width))
        } else {
            frames
        };
        let rows = image_rows(microscope.as_ref(), width, height);
        CalibratedImage {
            frames,
            rows,
            microscope,
            tags,
            raw,
            source: None,
            resolution: None,
            resolve_options: ResolveOptions::default(),
            prompt: Box::new(Console),
            recognizer: Box::new(Tesseract::default()),
        }
    }

    pub fn with_prompt<P: Prompt + 'static>(mut self, prompt: P) -> Self {
        self.prompt = Box::new(prompt);
        self
    }

    pub fn with_recognizer<R: TextRecognizer + 'static>(mut self, recognizer: R) -> Self {
        self.recognizer = Box::new(recognizer);
        self
    }

    pub fn microscope(&self) -> &dyn Microscope {
        self.microscope.as_ref()
    }

    /// The file the image was read from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn tags(&self) -> &TagTable {
        &self.tags
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len_of(Axis(0))
    }

    /// Image part of frame `index`.
    pub fn frame(&self, index: usize) -> Option<ArrayView2<f64>> {
        if index < self.frame_count() {
            Some(self.frames.slice(s![index, ..self.rows, ..]))
        } else {
            None
        }
    }

    /// Image part of the first frame.
    pub fn image(&self) -> ArrayView2<f64> {
        self.frames.slice(s![0, ..self.rows, ..])
    }

    /// Rows below the image, if the instrument writes a
    /// databar.
    pub fn databar(&self) -> Option<ArrayView2<f64>> {
        if self.rows < self.frames.len_of(Axis(1)) {
            Some(self.frames.slice(s![0, self.rows.., ..]))
        } else {
            None
        }
    }

    /// The scale bar measured in the databar while resolving
    /// the pixel size.
    pub fn scale_bar(&self) -> Option<ScaleBarReading> {
        self.resolution.and_then(|r| r.scale_bar)
    }

    /// The pixel size, resolved on first use.
    pub fn pixel_size(&mut self) -> Result<PixelSize> {
        Ok(self.resolution()?.pixel_size)
    }

    pub fn resolution(&mut self) -> Result<Resolution> {
        if let Some(resolution) = self.resolution {
            return Ok(resolution);
        }

        let metadata = match self.microscope.metadata(&self.raw, &self.tags) {
            Ok(view) => Some(view),
            Err(e) => {
                log::debug!("{}", e);
                None
            }
        };
        let height = self.frames.len_of(Axis(1));
        let databar = if self.rows < height {
            Some(self.frames.slice(s![0, self.rows.., ..]))
        } else {
            None
        };
        let mut ctx = Context {
            tags: &self.tags,
            metadata: metadata.as_ref(),
            databar,
            width: self.frames.len_of(Axis(2)),
            scheme: self.microscope.threshold_scheme(),
            prompt: self.prompt.as_mut(),
            recognizer: self.recognizer.as_ref(),
        };
        let resolution = resolve(&mut ctx, &self.microscope.strategies(), &self.resolve_options)?;
        self.resolution = Some(resolution);
        Ok(resolution)
    }

    /// Forget the cached pixel size so the next call resolves
    /// it again.
    pub fn invalidate_pixel_size(&mut self) {
        self.resolution = None;
    }

    /// Parse the file metadata, annotated with the pixel size
    /// once it is known.
    pub fn metadata(&self) -> Option<MetadataView> {
        match self.microscope.metadata(&self.raw, &self.tags) {
            Ok(mut view) => {
                if let Some(resolution) = &self.resolution {
                    self.microscope.annotate(&mut view, resolution);
                }
                Some(view)
            }
            Err(e) => {
                warn!("{}", e);
                None
            }
        }
    }

    /// Write the first frame with a scale bar.
    pub fn export_with_scalebar(&mut self, opts: &ExportOptions) -> Result<Exported> {
        self.export_frame_with_scalebar(0, opts, None)
    }

    pub fn export_frame_with_scalebar(
        &mut self,
        index: usize,
        opts: &ExportOptions,
        preprocess: Option<Preprocess>,
    ) -> Result<Exported> {
        check_overwrite(opts, self.source())?;
        anyhow::ensure!(
            index < self.frame_count(),
            "frame {} out of range, the image has {}",
            index,
            self.frame_count()
        );
        let pixel_size = self.pixel_size()?;
        if !pixel_size.is_isotropic() {
            warn!("pixel size {} is not isotropic, the bar uses the x size", pixel_size);
        }

        let mut opts = opts.clone();
        if opts.layout.nice_values.is_none() {
            opts.layout.nice_values = Some(self.microscope.nice_values());
        }
        let pixels = self.frames.slice(s![index, ..self.rows, ..]).into_dyn();
        render::export_with(pixels, pixel_size.x_length(), &opts, self.source(), preprocess)
    }
}
