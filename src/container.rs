//! Multi-dataset container files (Velox EMD).
//!
//! The HDF5 layer itself is behind the [`Container`] trait;
//! [`VeloxFile`] owns one open container and guarantees it is
//! closed exactly once, either by [`VeloxFile::close`] or when
//! dropped.
use anyhow::{anyhow, ensure, Result};
use ndarray::{Array2, Array3, Axis};

use crate::{image::CalibratedImage, loader::TagTable, microscope::Velox};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    Image,
    Spectrum,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetInfo {
    pub name: String,
    pub kind: DatasetKind,
    /// frames × height × width for images.
    pub shape: Vec<usize>,
}

pub trait Container {
    fn datasets(&self) -> Result<Vec<DatasetInfo>>;

    /// One frame of an image dataset.
    fn read_frame(&self, dataset: &str, index: usize) -> Result<Array2<f64>>;

    /// The metadata block stored with one frame.
    fn metadata_block(&self, dataset: &str, index: usize) -> Result<Vec<u8>>;

    fn close(&mut self) -> Result<()>;

    /// Every frame of an image dataset.
    fn read_stack(&self, dataset: &str) -> Result<Array3<f64>> {
        let info = self
            .datasets()?
            .into_iter()
            .find(|d| d.name == dataset)
            .ok_or_else(|| anyhow!("no dataset named {:?}", dataset))?;
        ensure!(
            info.kind == DatasetKind::Image && info.shape.len() == 3,
            "{:?} is not an image stack",
            dataset
        );
        let frames = (0..info.shape[0])
            .map(|i| self.read_frame(dataset, i))
            .collect::<Result<Vec<_>>>()?;
        let views: Vec<_> = frames.iter().map(|f| f.view()).collect();
        Ok(ndarray::stack(Axis(0), &views)?)
    }
}

pub struct VeloxFile<C: Container> {
    container: Option<C>,
}

impl<C: Container> VeloxFile<C> {
    pub fn new(container: C) -> Self {
        VeloxFile {
            container: Some(container),
        }
    }

    fn container(&self) -> Result<&C> {
        self.container
            .as_ref()
            .ok_or_else(|| anyhow!("the Velox file is closed"))
    }

    pub fn datasets(&self) -> Result<Vec<DatasetInfo>> {
        self.container()?.datasets()
    }

    /// Image datasets only.
    pub fn images(&self) -> Result<Vec<DatasetInfo>> {
        Ok(self
            .datasets()?
            .into_iter()
            .filter(|d| d.kind == DatasetKind::Image)
            .collect())
    }

    /// All frames of an image dataset.
    pub fn stack(&self, dataset: &str) -> Result<Array3<f64>> {
        self.container()?.read_stack(dataset)
    }

    /// Frame `index` of `dataset`, calibrated with that
    /// frame's metadata.
    pub fn image(&self, dataset: &str, index: usize) -> Result<CalibratedImage> {
        let container = self.container()?;
        let frame = container.read_frame(dataset, index)?;
        let raw = container.metadata_block(dataset, index)?;
        Ok(CalibratedImage::from_parts(
            frame.insert_axis(Axis(0)),
            TagTable::new(),
            raw,
            Box::new(Velox),
        ))
    }

    pub fn close(mut self) -> Result<()> {
        match self.container.take() {
            Some(mut container) => container.close(),
            None => Ok(()),
        }
    }
}

impl<C: Container> Drop for VeloxFile<C> {
    fn drop(&mut self) {
        if let Some(mut container) = self.container.take() {
            if let Err(e) = container.close() {
                log::warn!("closing Velox file: {:#}", e);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::units::Unit;
    use std::{cell::Cell, rc::Rc};

    pub(crate) struct Memory {
        pub closes: Rc<Cell<usize>>,
        pub stack: Array3<f64>,
        pub metadata: Vec<u8>,
    }

    impl Memory {
        pub fn new(closes: Rc<Cell<usize>>) -> Self {
            let stack = Array3::from_shape_fn((2, 4, 4), |(f, y, x)| (f * 100 + y * 4 + x) as f64);
            let metadata = br#"{"BinaryResult": {"PixelSize": {"width": "2e-10", "height": "2e-10"},
                "PixelUnitX": "m", "PixelUnitY": "m"}}"#
                .iter()
                .copied()
                .chain(std::iter::repeat(0).take(16))
                .collect();
            Memory {
                closes,
                stack,
                metadata,
            }
        }
    }

    impl Container for Memory {
        fn datasets(&self) -> Result<Vec<DatasetInfo>> {
            Ok(vec![
                DatasetInfo {
                    name: "HAADF".into(),
                    kind: DatasetKind::Image,
                    shape: self.stack.shape().to_vec(),
                },
                DatasetInfo {
                    name: "EDS".into(),
                    kind: DatasetKind::Spectrum,
                    shape: vec![4096],
                },
            ])
        }

        fn read_frame(&self, dataset: &str, index: usize) -> Result<Array2<f64>> {
            ensure!(dataset == "HAADF", "no image dataset {:?}", dataset);
            ensure!(index < self.stack.len_of(Axis(0)), "frame {} out of range", index);
            Ok(self.stack.index_axis(Axis(0), index).to_owned())
        }

        fn metadata_block(&self, _: &str, _: usize) -> Result<Vec<u8>> {
            Ok(self.metadata.clone())
        }

        fn close(&mut self) -> Result<()> {
            self.closes.set(self.closes.get() + 1);
            Ok(())
        }
    }

    #[test]
    fn closed_once_explicitly() -> Result<()> {
        let closes = Rc::new(Cell::new(0));
        let file = VeloxFile::new(Memory::new(closes.clone()));
        file.close()?;
        assert_eq!(closes.get(), 1);
        Ok(())
    }

    #[test]
    fn closed_once_on_drop() {
        let closes = Rc::new(Cell::new(0));
        {
            let _file = VeloxFile::new(Memory::new(closes.clone()));
        }
        assert_eq!(closes.get(), 1);
    }

    #[test]
    fn closed_on_error_paths() {
        let closes = Rc::new(Cell::new(0));
        let result = (|| -> Result<()> {
            let file = VeloxFile::new(Memory::new(closes.clone()));
            file.image("missing", 0)?;
            Ok(())
        })();
        assert!(result.is_err());
        assert_eq!(closes.get(), 1);
    }

    #[test]
    fn listing_and_stacks() -> Result<()> {
        let file = VeloxFile::new(Memory::new(Rc::new(Cell::new(0))));
        let images = file.images()?;
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].shape, vec![2, 4, 4]);

        let stack = file.stack("HAADF")?;
        assert_eq!(stack.dim(), (2, 4, 4));
        assert_eq!(stack[(1, 0, 1)], 101.);
        assert!(file.stack("EDS").is_err());
        Ok(())
    }

    #[test]
    fn frames_are_calibrated() -> Result<()> {
        let file = VeloxFile::new(Memory::new(Rc::new(Cell::new(0))));
        let mut image = file.image("HAADF", 1)?;
        assert_eq!(image.image()[(0, 0)], 100.);
        assert!(image.databar().is_none());
        let size = image.pixel_size()?;
        // 2e-10 m is above the 10 pm threshold of the five tier scheme
        assert_eq!(size.unit, Unit::Nanometer);
        assert!((size.x - 0.2).abs() < 1e-12);
        Ok(())
    }
}
