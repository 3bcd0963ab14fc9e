use anyhow::{Context, Result};
use image::{imageops::FilterType, RgbImage};
use std::{ffi::CString, os::raw::{c_char, c_int, c_void}};
use tracing::{debug, info};

use crate::decode::{decode_ssd, decode_wpod, wpod_input_dims, WPOD_STRIDE};
use crate::{load_labels, Classifier, Detection, VisionConfig};

#[repr(C)]
struct TfLiteModel;
#[repr(C)]
struct TfLiteInterpreterOptions;
#[repr(C)]
struct TfLiteInterpreter;
#[repr(C)]
struct TfLiteTensor;

#[link(name = "tensorflowlite_c")]
extern "C" {
    fn TfLiteModelCreateFromFile(model_path: *const c_char) -> *mut TfLiteModel;
    fn TfLiteModelDelete(model: *mut TfLiteModel);

    fn TfLiteInterpreterOptionsCreate() -> *mut TfLiteInterpreterOptions;
    fn TfLiteInterpreterOptionsDelete(options: *mut TfLiteInterpreterOptions);
    fn TfLiteInterpreterOptionsSetNumThreads(options: *mut TfLiteInterpreterOptions, num_threads: c_int);

    fn TfLiteInterpreterCreate(model: *const TfLiteModel, options: *const TfLiteInterpreterOptions) -> *mut TfLiteInterpreter;
    fn TfLiteInterpreterDelete(interpreter: *mut TfLiteInterpreter);

    fn TfLiteInterpreterAllocateTensors(interpreter: *mut TfLiteInterpreter) -> c_int;
    fn TfLiteInterpreterResizeInputTensor(interpreter: *mut TfLiteInterpreter, input_index: c_int, input_dims: *const c_int, input_dims_size: c_int) -> c_int;
    fn TfLiteInterpreterInvoke(interpreter: *mut TfLiteInterpreter) -> c_int;

    fn TfLiteInterpreterGetInputTensor(interpreter: *mut TfLiteInterpreter, index: c_int) -> *mut TfLiteTensor;
    fn TfLiteInterpreterGetOutputTensorCount(interpreter: *const TfLiteInterpreter) -> c_int;
    fn TfLiteInterpreterGetOutputTensor(interpreter: *mut TfLiteInterpreter, index: c_int) -> *const TfLiteTensor;

    fn TfLiteTensorData(tensor: *const TfLiteTensor) -> *mut c_void;
    fn TfLiteTensorByteSize(tensor: *const TfLiteTensor) -> usize;

    fn TfLiteTensorNumDims(tensor: *const TfLiteTensor) -> c_int;
    fn TfLiteTensorDim(tensor: *const TfLiteTensor, dim_index: c_int) -> c_int;
}

/// Owns one model + interpreter pair.
struct Interpreter {
    path: String,
    model: *mut TfLiteModel,
    opts: *mut TfLiteInterpreterOptions,
    interp: *mut TfLiteInterpreter,
}

// Only ever driven by one pipeline task at a time.
unsafe impl Send for Interpreter {}

impl Interpreter {
    fn load(path: &str, num_threads: i32) -> Result<Self> {
        let cpath = CString::new(path)?;
        let model = unsafe { TfLiteModelCreateFromFile(cpath.as_ptr()) };
        anyhow::ensure!(!model.is_null(), "failed to load tflite model: {}", path);

        let opts = unsafe { TfLiteInterpreterOptionsCreate() };
        if opts.is_null() {
            unsafe { TfLiteModelDelete(model) };
            anyhow::bail!("failed to create tflite options");
        }
        unsafe { TfLiteInterpreterOptionsSetNumThreads(opts, num_threads.max(1)) };

        let interp = unsafe { TfLiteInterpreterCreate(model, opts) };
        let me = Self { path: path.to_string(), model, opts, interp };
        anyhow::ensure!(!me.interp.is_null(), "failed to create tflite interpreter for {}", path);

        let rc = unsafe { TfLiteInterpreterAllocateTensors(me.interp) };
        anyhow::ensure!(rc == 0, "TfLiteInterpreterAllocateTensors failed");

        info!("vision: loaded TFLite model: {}", path);
        Ok(me)
    }

    fn resize_input(&mut self, dims: &[i32]) -> Result<()> {
        let rc = unsafe { TfLiteInterpreterResizeInputTensor(self.interp, 0, dims.as_ptr(), dims.len() as c_int) };
        anyhow::ensure!(rc == 0, "TfLiteInterpreterResizeInputTensor {:?} failed", dims);
        let rc = unsafe { TfLiteInterpreterAllocateTensors(self.interp) };
        anyhow::ensure!(rc == 0, "TfLiteInterpreterAllocateTensors failed after resize");
        Ok(())
    }

    fn write_input(&mut self, bytes: &[u8]) -> Result<()> {
        let input = unsafe { TfLiteInterpreterGetInputTensor(self.interp, 0) };
        anyhow::ensure!(!input.is_null(), "no input tensor");
        let in_bytes = unsafe { TfLiteTensorByteSize(input) };
        let in_ptr = unsafe { TfLiteTensorData(input) as *mut u8 };
        anyhow::ensure!(!in_ptr.is_null(), "null input tensor data");
        anyhow::ensure!(in_bytes == bytes.len(), "input tensor size mismatch: {} != {}", in_bytes, bytes.len());
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), in_ptr, bytes.len()) };
        Ok(())
    }

    fn invoke(&mut self) -> Result<()> {
        let rc = unsafe { TfLiteInterpreterInvoke(self.interp) };
        anyhow::ensure!(rc == 0, "TfLiteInterpreterInvoke failed ({})", self.path);
        Ok(())
    }

    fn output(&self, index: i32) -> Result<(Vec<i32>, &[f32])> {
        let out = unsafe { TfLiteInterpreterGetOutputTensor(self.interp, index) };
        anyhow::ensure!(!out.is_null(), "no output tensor {}", index);
        let ptr = unsafe { TfLiteTensorData(out) as *const f32 };
        anyhow::ensure!(!ptr.is_null(), "null output tensor data {}", index);
        let len = unsafe { TfLiteTensorByteSize(out) } / std::mem::size_of::<f32>();
        Ok((tensor_dims(out), unsafe { std::slice::from_raw_parts(ptr, len) }))
    }

    fn inspect(&mut self) -> Result<String> {
        let input = unsafe { TfLiteInterpreterGetInputTensor(self.interp, 0) };
        anyhow::ensure!(!input.is_null(), "no input tensor");
        let mut s = format!(
            "{}:\n- input[0] dims={:?} bytes={}\n",
            self.path,
            tensor_dims(input),
            unsafe { TfLiteTensorByteSize(input) }
        );
        let n = unsafe { TfLiteInterpreterGetOutputTensorCount(self.interp) };
        for i in 0..n {
            let out = unsafe { TfLiteInterpreterGetOutputTensor(self.interp, i) };
            if out.is_null() { continue; }
            s.push_str(&format!(
                "- output[{}] dims={:?} bytes={}\n",
                i,
                tensor_dims(out),
                unsafe { TfLiteTensorByteSize(out) }
            ));
        }
        Ok(s)
    }
}

fn tensor_dims(t: *const TfLiteTensor) -> Vec<i32> {
    unsafe {
        let nd = TfLiteTensorNumDims(t);
        let mut v = Vec::with_capacity(nd as usize);
        for i in 0..nd { v.push(TfLiteTensorDim(t, i)); }
        v
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        unsafe {
            if !self.interp.is_null() { TfLiteInterpreterDelete(self.interp); }
            if !self.opts.is_null() { TfLiteInterpreterOptionsDelete(self.opts); }
            if !self.model.is_null() { TfLiteModelDelete(self.model); }
        }
    }
}

/// SSD vehicle detector with a fixed square input.
pub struct SsdVehicleModel {
    interp: Interpreter,
    labels: Vec<String>,
    input_size: u32,
    quantized: bool,
    max_detections: usize,
}

impl SsdVehicleModel {
    pub fn new(cfg: &VisionConfig) -> Result<Self> {
        let labels = load_labels(&cfg.labels_path)?;
        let interp = Interpreter::load(&cfg.vehicle_model_path, cfg.num_threads)?;
        Ok(Self {
            interp,
            labels,
            input_size: cfg.input_size,
            quantized: cfg.vehicle_quantized,
            max_detections: cfg.max_detections,
        })
    }

    pub fn inspect(&mut self) -> Result<String> {
        self.interp.inspect()
    }
}

impl Classifier for SsdVehicleModel {
    fn recognize(&mut self, image: &RgbImage) -> Result<Vec<Detection>> {
        let size = self.input_size;
        let resized;
        let img = if image.dimensions() == (size, size) {
            image
        } else {
            resized = image::imageops::resize(image, size, size, FilterType::Triangle);
            &resized
        };

        if self.quantized {
            self.interp.write_input(img.as_raw())?;
        } else {
            let floats: Vec<u8> = img
                .as_raw()
                .iter()
                .flat_map(|&p| ((p as f32 - 128.0) / 128.0).to_ne_bytes())
                .collect();
            self.interp.write_input(&floats)?;
        }
        self.interp.invoke()?;

        let (_, locations) = self.interp.output(0)?;
        let (_, classes) = self.interp.output(1)?;
        let (_, scores) = self.interp.output(2)?;
        let (_, count) = self.interp.output(3)?;
        let n = count.first().copied().unwrap_or(0.0).max(0.0) as usize;

        let mut dets = decode_ssd(locations, classes, scores, n.min(self.max_detections), &self.labels, size);
        dets.truncate(self.max_detections);
        debug!("vision: vehicle model returned {} detections", dets.len());
        Ok(dets)
    }
}

/// WPOD plate detector; the input tensor is resized per vehicle crop.
pub struct WpodPlateModel {
    interp: Interpreter,
    threshold: f32,
    nms_iou: f32,
    input_dims: Option<(u32, u32)>,
}

impl WpodPlateModel {
    pub fn new(cfg: &VisionConfig) -> Result<Self> {
        let interp = Interpreter::load(&cfg.plate_model_path, cfg.num_threads)?;
        Ok(Self { interp, threshold: cfg.plate_threshold, nms_iou: cfg.plate_nms_iou, input_dims: None })
    }

    pub fn inspect(&mut self) -> Result<String> {
        self.interp.inspect()
    }
}

impl Classifier for WpodPlateModel {
    fn recognize(&mut self, image: &RgbImage) -> Result<Vec<Detection>> {
        let (iw, ih) = image.dimensions();
        let (w, h) = wpod_input_dims(iw, ih);
        if self.input_dims != Some((w, h)) {
            self.interp.resize_input(&[1, h as i32, w as i32, 3])?;
            self.input_dims = Some((w, h));
        }

        let scaled = image::imageops::resize(image, w, h, FilterType::Nearest);
        let floats: Vec<u8> = scaled
            .as_raw()
            .iter()
            .flat_map(|&p| (p as f32 / 255.0).to_ne_bytes())
            .collect();
        self.interp.write_input(&floats)?;
        self.interp.invoke()?;

        let (dims, raw) = self.interp.output(0)?;
        let (rows, cols) = match dims.as_slice() {
            [1, r, c, 8] => (*r as usize, *c as usize),
            other => anyhow::bail!("unexpected plate output dims {:?}", other),
        };
        anyhow::ensure!(
            rows == (h / WPOD_STRIDE) as usize && cols == (w / WPOD_STRIDE) as usize,
            "plate grid {}x{} does not match input {}x{}", rows, cols, w, h
        );

        let dets = decode_wpod(raw, rows, cols, iw, ih, self.threshold, self.nms_iou);
        debug!("vision: plate model returned {} detections", dets.len());
        Ok(dets)
    }
}

/// Loads both models named in `cfg`.
pub fn load_models(cfg: &VisionConfig) -> Result<(SsdVehicleModel, WpodPlateModel)> {
    anyhow::ensure!(cfg.backend == "tflite", "unsupported vision.backend: {}", cfg.backend);
    let vehicle = SsdVehicleModel::new(cfg).context("load vehicle model")?;
    let plate = WpodPlateModel::new(cfg).context("load plate model")?;
    Ok((vehicle, plate))
}
