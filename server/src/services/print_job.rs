//! Print Job Service (§4.8, C12): fetch a 3MF bundle from the printer's
//! FTPS file channel, cache it, extract it, parse its plate/gcode
//! metadata, and derive the per-plate skip-objects payload. `execute_print`
//! builds and publishes the corresponding `project_file` command.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::warn;

use crate::errors::{DomainError, DomainResult};
use crate::models::LastSentProjectFile;
use crate::services::connection_orchestrator::ConnectionOrchestrator;
use crate::state::StateOrchestrator;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PrintJobStatus {
    Idle,
    Running,
    Completed,
    Error,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct PlateObject {
    pub identify_id: Option<i64>,
    pub name: String,
    pub skipped: bool,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct PlateFilament {
    pub id: i64,
    pub tray_info_idx: String,
    pub r#type: String,
    pub color: String,
    pub used_m: f64,
    pub used_g: f64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct PlateWarning {
    pub msg: String,
    pub level: String,
    pub error_code: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct GcodeHeaderSummary {
    pub model_printing_time_s: Option<i64>,
    pub total_estimated_time_s: Option<i64>,
    pub total_layer_number: Option<i64>,
    pub total_filament_weight_g: Option<f64>,
    pub filament_ids: Vec<String>,
    pub filament_settings_id: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct PlateSkipInfo {
    pub index: Option<i64>,
    pub available: bool,
    pub reason: Option<String>,
    pub pick_path: Option<String>,
    pub pick_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct PlateInfo {
    pub index: Option<i64>,
    pub pick_file: Option<String>,
    pub preview_url: Option<String>,
    pub objects: Vec<PlateObject>,
    pub filaments: Vec<PlateFilament>,
    pub warnings: Vec<PlateWarning>,
    pub gcode_header: GcodeHeaderSummary,
    pub skip: PlateSkipInfo,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct PrintJobMetadata {
    pub display_name: String,
    pub extract_dir: String,
    pub plates: Vec<PlateInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrintJobState {
    pub active: bool,
    pub status: PrintJobStatus,
    pub progress: u8,
    pub step: String,
    pub message: Option<String>,
    pub filename: Option<String>,
    pub file_path: Option<String>,
    pub download_bytes: Option<u64>,
    pub download_total: Option<u64>,
    pub metadata_result: Option<PrintJobMetadata>,
}

impl Default for PrintJobState {
    fn default() -> Self {
        Self {
            active: false,
            status: PrintJobStatus::Idle,
            progress: 0,
            step: String::new(),
            message: None,
            filename: None,
            file_path: None,
            download_bytes: None,
            download_total: None,
            metadata_result: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CacheMeta {
    name: String,
    modified: Option<String>,
    size: u64,
    path: String,
}

#[derive(Debug, Default)]
struct SlicePlate {
    index: Option<i64>,
    metadata: HashMap<String, String>,
    filaments: Vec<PlateFilament>,
    warnings: Vec<PlateWarning>,
    objects: Vec<PlateObject>,
}

pub struct PrintJobService {
    cache_dir: PathBuf,
    orchestrator: Arc<ConnectionOrchestrator>,
    state: Arc<StateOrchestrator>,
    jobs: RwLock<HashMap<String, Arc<RwLock<PrintJobState>>>>,
    generation: RwLock<HashMap<String, Arc<AtomicU64>>>,
}

impl PrintJobService {
    pub fn new(cache_dir: PathBuf, orchestrator: Arc<ConnectionOrchestrator>, state: Arc<StateOrchestrator>) -> Arc<Self> {
        Arc::new(Self {
            cache_dir,
            orchestrator,
            state,
            jobs: RwLock::new(HashMap::new()),
            generation: RwLock::new(HashMap::new()),
        })
    }

    pub async fn status(&self, printer_id: &str) -> PrintJobState {
        match self.jobs.read().await.get(printer_id) {
            Some(job) => job.read().await.clone(),
            None => PrintJobState::default(),
        }
    }

    /// Cancel any in-flight job for this printer and start a new one.
    /// `prepare` itself returns immediately; progress is observable via
    /// [`Self::status`].
    pub async fn prepare(self: &Arc<Self>, printer_id: &str, filename: &str) -> DomainResult<()> {
        let display_name = validate_path(filename)?;

        let my_generation = {
            let mut generations = self.generation.write().await;
            let counter = generations.entry(printer_id.to_string()).or_insert_with(|| Arc::new(AtomicU64::new(0)));
            counter.fetch_add(1, Ordering::SeqCst) + 1
        };

        let job = {
            let mut jobs = self.jobs.write().await;
            let job = jobs.entry(printer_id.to_string()).or_insert_with(|| Arc::new(RwLock::new(PrintJobState::default())));
            job.clone()
        };
        {
            let mut state = job.write().await;
            *state = PrintJobState {
                active: true,
                status: PrintJobStatus::Running,
                step: "Listing remote file".to_string(),
                filename: Some(display_name.clone()),
                file_path: Some(filename.to_string()),
                ..Default::default()
            };
        }

        let this = self.clone();
        let printer_id = printer_id.to_string();
        let filename = filename.to_string();
        let generation_counter =
            self.generation.read().await.get(&printer_id).cloned().expect("generation counter initialized above");
        tokio::spawn(async move {
            let result = this.run_pipeline(&printer_id, &filename, &job, my_generation, &generation_counter).await;
            if let Err(e) = result {
                if generation_counter.load(Ordering::SeqCst) == my_generation {
                    let mut state = job.write().await;
                    state.active = false;
                    state.status = PrintJobStatus::Error;
                    state.message = Some(e.to_string());
                }
            }
        });
        Ok(())
    }

    async fn run_pipeline(
        &self,
        printer_id: &str,
        filename: &str,
        job: &Arc<RwLock<PrintJobState>>,
        my_generation: u64,
        generation: &Arc<AtomicU64>,
    ) -> DomainResult<()> {
        let is_current = || generation.load(Ordering::SeqCst) == my_generation;

        let ftps = self
            .orchestrator
            .ftps_for(printer_id)
            .await
            .ok_or_else(|| DomainError::ServiceUnavailable("FTPS channel is not connected".into()))?;

        let (parent, base) = split_path(filename);
        let entries = ftps.list(&parent).await?;
        let entry = entries
            .iter()
            .find(|e| e.name == base)
            .ok_or_else(|| DomainError::NotFound(format!("remote file {filename}")))?;

        if !is_current() {
            return Err(DomainError::Cancelled);
        }

        let printer_cache = self.cache_dir.join(printer_id);
        tokio::fs::create_dir_all(&printer_cache).await.map_err(|e| DomainError::Internal(e.to_string()))?;
        let stem = Path::new(&base).file_stem().and_then(|s| s.to_str()).unwrap_or(&base).to_string();
        let cached_file = printer_cache.join(&base);
        let meta_path = printer_cache.join(format!("{stem}.meta.json"));
        let extract_dir = printer_cache.join(&stem);

        let cache_valid = cache_matches(&meta_path, &cached_file, &entry.name, entry.modified.as_deref(), entry.size, filename).await;

        if !cache_valid {
            self.set_step(job, "Downloading file", 10).await;
            let bytes = ftps.retrieve(filename).await?;
            if !is_current() {
                return Err(DomainError::Cancelled);
            }
            {
                let mut state = job.write().await;
                state.download_bytes = Some(bytes.len() as u64);
                state.download_total = Some(bytes.len() as u64);
            }
            let tmp_path = cached_file.with_extension("3mf.tmp");
            tokio::fs::write(&tmp_path, &bytes).await.map_err(|e| DomainError::Internal(e.to_string()))?;
            tokio::fs::rename(&tmp_path, &cached_file).await.map_err(|e| DomainError::Internal(e.to_string()))?;
            let meta = json!({"name": entry.name, "modified": entry.modified, "size": entry.size, "path": filename});
            tokio::fs::write(&meta_path, serde_json::to_vec_pretty(&meta).unwrap())
                .await
                .map_err(|e| DomainError::Internal(e.to_string()))?;
        } else {
            self.set_step(job, "Using cached file", 40).await;
        }

        self.set_step(job, "Extracting bundle", 55).await;
        let archive_bytes = tokio::fs::read(&cached_file).await.map_err(|e| DomainError::Internal(e.to_string()))?;
        let extract_target = extract_dir.clone();
        tokio::task::spawn_blocking(move || extract_3mf(&archive_bytes, &extract_target))
            .await
            .map_err(|e| DomainError::Internal(format!("extraction task panicked: {e}")))??;

        if !is_current() {
            return Err(DomainError::Cancelled);
        }

        self.set_step(job, "Parsing metadata", 75).await;
        let metadata_dir = extract_dir.join("Metadata");
        let slice_plates = parse_slice_info(&metadata_dir).await?;
        let plater_ids = parse_model_settings(&metadata_dir).await?;

        let mut plates = Vec::new();
        for slice_plate in slice_plates {
            let gcode_stem = detect_plate_gcode(&metadata_dir, slice_plate.index).await;
            let pick_file = plater_ids
                .get(&slice_plate.index.unwrap_or_default())
                .cloned()
                .or_else(|| gcode_stem.clone().map(|s| format!("Metadata/{s}.gcode")));

            let gcode_header = match &pick_file {
                Some(path) => parse_gcode_header(&extract_dir.join(path)).await,
                None => GcodeHeaderSummary::default(),
            };

            let preview_url = gcode_stem.as_ref().and_then(|stem| {
                let png = metadata_dir.join(format!("{stem}.png"));
                if png.exists() {
                    Some(format!("/api/printjob/plate-preview?printer_id={printer_id}&plate={stem}"))
                } else {
                    None
                }
            });

            let label_object_enabled =
                slice_plate.metadata.get("label_object_enabled").map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false);
            let pick_file_exists = pick_file.as_ref().map(|p| extract_dir.join(p).exists()).unwrap_or(false);

            let skip = if !cache_valid {
                PlateSkipInfo { index: slice_plate.index, available: false, reason: Some("cache_meta_missing".into()), ..Default::default() }
            } else if !label_object_enabled {
                PlateSkipInfo { index: slice_plate.index, available: false, reason: Some("label_object_disabled".into()), ..Default::default() }
            } else if !pick_file_exists {
                PlateSkipInfo { index: slice_plate.index, available: false, reason: Some("pick_file_missing".into()), ..Default::default() }
            } else if slice_plate.objects.is_empty() {
                PlateSkipInfo { index: slice_plate.index, available: false, reason: Some("objects_missing".into()), ..Default::default() }
            } else {
                PlateSkipInfo {
                    index: slice_plate.index,
                    available: true,
                    reason: None,
                    pick_path: pick_file.clone(),
                    pick_url: pick_file.as_ref().map(|p| format!("/api/printjob/skip-metadata?printer_id={printer_id}&path={p}")),
                }
            };

            plates.push(PlateInfo {
                index: slice_plate.index,
                pick_file,
                preview_url,
                objects: slice_plate.objects,
                filaments: slice_plate.filaments,
                warnings: slice_plate.warnings,
                gcode_header,
                skip,
            });
        }

        if is_current() {
            let mut state = job.write().await;
            state.active = false;
            state.status = PrintJobStatus::Completed;
            state.progress = 100;
            state.step = "Ready".to_string();
            state.metadata_result = Some(PrintJobMetadata {
                display_name: base,
                extract_dir: extract_dir.display().to_string(),
                plates,
            });
        }
        Ok(())
    }

    async fn set_step(&self, job: &Arc<RwLock<PrintJobState>>, step: &str, progress: u8) {
        let mut state = job.write().await;
        state.step = step.to_string();
        state.progress = progress;
    }

    /// Build and publish a `project_file` command for the active printer,
    /// recording it as `LastSentProjectFile` for print-again derivation.
    pub async fn execute_print(&self, printer_id: &str, params: ExecutePrintParams) -> DomainResult<()> {
        let mqtt = self
            .orchestrator
            .mqtt_for(printer_id)
            .await
            .ok_or_else(|| DomainError::ServiceUnavailable("MQTT channel is not connected".into()))?;

        let payload = json!({
            "print": {
                "command": "project_file",
                "sequence_id": "0",
                "url": params.url,
                "file": params.file,
                "param": params.plate,
                "bed_leveling": params.bed_leveling,
                "flow_cali": params.flow_cali,
                "timelapse": params.timelapse,
                "use_ams": params.use_ams,
                "layer_inspect": params.layer_inspect,
                "vibration_cali": params.vibration_cali,
                "ams_mapping": params.ams_mapping,
            }
        });
        mqtt.send_command(payload).await?;

        self.state
            .set_last_sent_project_file(
                printer_id,
                LastSentProjectFile {
                    url: params.url,
                    file: Some(params.file),
                    plate: Some(params.plate),
                    bed_leveling: params.bed_leveling,
                    flow_cali: params.flow_cali,
                    timelapse: params.timelapse,
                    use_ams: params.use_ams,
                    layer_inspect: params.layer_inspect,
                    vibration_cali: params.vibration_cali,
                    ams_mapping: params.ams_mapping,
                    sent_at: Some(Utc::now()),
                },
            )
            .await;
        Ok(())
    }

    pub async fn cancel(&self, printer_id: &str) {
        if let Some(counter) = self.generation.read().await.get(printer_id) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        if let Some(job) = self.jobs.read().await.get(printer_id) {
            let mut state = job.write().await;
            state.active = false;
            state.status = PrintJobStatus::Cancelled;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecutePrintParams {
    pub url: String,
    pub file: String,
    pub plate: String,
    pub bed_leveling: bool,
    pub flow_cali: bool,
    pub timelapse: bool,
    pub use_ams: bool,
    pub layer_inspect: bool,
    pub vibration_cali: bool,
    pub ams_mapping: Option<Vec<i32>>,
}

fn validate_path(path: &str) -> DomainResult<String> {
    if path.split('/').any(|part| part == "..") {
        return Err(DomainError::BadRequest(format!("path traversal rejected: {path}")));
    }
    let name = path.rsplit('/').next().unwrap_or(path);
    if name.is_empty() {
        return Err(DomainError::BadRequest("empty filename".into()));
    }
    Ok(name.to_string())
}

fn split_path(path: &str) -> (String, String) {
    match path.rsplit_once('/') {
        Some((parent, name)) => (if parent.is_empty() { "/".to_string() } else { parent.to_string() }, name.to_string()),
        None => ("/".to_string(), path.to_string()),
    }
}

async fn cache_matches(meta_path: &Path, cached_file: &Path, name: &str, modified: Option<&str>, size: u64, path: &str) -> bool {
    if !cached_file.exists() {
        return false;
    }
    let Ok(bytes) = tokio::fs::read(meta_path).await else { return false };
    let Ok(meta) = serde_json::from_slice::<CacheMeta>(&bytes) else { return false };
    meta.name == name && meta.modified.as_deref() == modified && meta.size == size && meta.path == path
}

fn extract_3mf(archive_bytes: &[u8], target: &Path) -> DomainResult<()> {
    let reader = std::io::Cursor::new(archive_bytes);
    let mut archive = zip::ZipArchive::new(reader).map_err(|e| DomainError::BadRequest(format!("invalid 3mf bundle: {e}")))?;
    let has_metadata = (0..archive.len()).any(|i| {
        archive
            .by_index(i)
            .map(|f| f.name().starts_with("Metadata/"))
            .unwrap_or(false)
    });
    if !has_metadata {
        return Err(DomainError::BadRequest("3mf bundle has no Metadata/ directory".into()));
    }
    std::fs::create_dir_all(target).map_err(|e| DomainError::Internal(e.to_string()))?;
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(|e| DomainError::Internal(e.to_string()))?;
        let Some(enclosed) = file.enclosed_name() else { continue };
        let out_path = target.join(enclosed);
        if file.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|e| DomainError::Internal(e.to_string()))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DomainError::Internal(e.to_string()))?;
        }
        let mut out = std::fs::File::create(&out_path).map_err(|e| DomainError::Internal(e.to_string()))?;
        std::io::copy(&mut file, &mut out).map_err(|e| DomainError::Internal(e.to_string()))?;
    }
    Ok(())
}

async fn parse_slice_info(metadata_dir: &Path) -> DomainResult<Vec<SlicePlate>> {
    let path = metadata_dir.join("slice_info.config");
    let Ok(xml) = tokio::fs::read_to_string(&path).await else {
        warn!(path = %path.display(), "slice_info.config missing");
        return Ok(Vec::new());
    };
    Ok(parse_slice_info_xml(&xml))
}

fn parse_slice_info_xml(xml: &str) -> Vec<SlicePlate> {
    use quick_xml::events::Event;
    use quick_xml::reader::Reader;

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text_start = true;
    let mut plates = Vec::new();
    let mut current: Option<SlicePlate> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Err(_) => break,
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"plate" => {
                current = Some(SlicePlate::default());
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"plate" => {
                if let Some(plate) = current.take() {
                    plates.push(plate);
                }
            }
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e)) => {
                let Some(plate) = current.as_mut() else { buf.clear(); continue };
                let attrs = attr_map(e);
                match e.local_name().as_ref() {
                    b"metadata" => {
                        if let Some(key) = attrs.get("key") {
                            plate.metadata.insert(key.clone(), attrs.get("value").cloned().unwrap_or_default());
                        }
                    }
                    b"filament" => plate.filaments.push(PlateFilament {
                        id: attrs.get("id").and_then(|v| v.parse().ok()).unwrap_or(0),
                        tray_info_idx: attrs.get("tray_info_idx").cloned().unwrap_or_default(),
                        r#type: attrs.get("type").cloned().unwrap_or_default(),
                        color: attrs.get("color").cloned().unwrap_or_default(),
                        used_m: attrs.get("used_m").and_then(|v| v.parse().ok()).unwrap_or(0.0),
                        used_g: attrs.get("used_g").and_then(|v| v.parse().ok()).unwrap_or(0.0),
                    }),
                    b"warning" => plate.warnings.push(PlateWarning {
                        msg: attrs.get("msg").cloned().unwrap_or_default(),
                        level: attrs.get("level").cloned().unwrap_or_default(),
                        error_code: attrs.get("error_code").cloned().unwrap_or_default(),
                    }),
                    b"object" => plate.objects.push(PlateObject {
                        identify_id: attrs.get("identify_id").and_then(|v| v.parse().ok()),
                        name: attrs.get("name").cloned().unwrap_or_default(),
                        skipped: attrs.get("skipped").map(|v| v.eq_ignore_ascii_case("true")).unwrap_or(false),
                    }),
                    _ => {}
                }
            }
            _ => {}
        }
        buf.clear();
    }

    for plate in &mut plates {
        plate.index = plate.metadata.get("index").and_then(|v| v.parse().ok());
    }
    plates
}

fn attr_map(e: &quick_xml::events::BytesStart) -> HashMap<String, String> {
    e.attributes()
        .filter_map(|a| a.ok())
        .map(|a| {
            let key = String::from_utf8_lossy(a.key.as_ref()).to_string();
            let value = String::from_utf8_lossy(a.value.as_ref()).to_string();
            (key, value)
        })
        .collect()
}

/// `Metadata/model_settings.config` plater_id -> pick_file mapping.
async fn parse_model_settings(metadata_dir: &Path) -> DomainResult<HashMap<i64, String>> {
    let path = metadata_dir.join("model_settings.config");
    let Ok(xml) = tokio::fs::read_to_string(&path).await else {
        return Ok(HashMap::new());
    };
    use quick_xml::events::Event;
    use quick_xml::reader::Reader;

    let mut reader = Reader::from_str(&xml);
    reader.config_mut().trim_text_start = true;
    let mut mapping = HashMap::new();
    let mut current_meta: HashMap<String, String> = HashMap::new();
    let mut in_plate = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Err(_) => break,
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"plate" => {
                in_plate = true;
                current_meta.clear();
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"plate" => {
                in_plate = false;
                if let Some(plater_id) = current_meta.get("plater_id").and_then(|v| v.parse::<i64>().ok()) {
                    if let Some(pick_file) = current_meta.get("pick_file") {
                        mapping.insert(plater_id, pick_file.clone());
                    }
                }
            }
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e)) if in_plate && e.local_name().as_ref() == b"metadata" => {
                let attrs = attr_map(e);
                if let Some(key) = attrs.get("key") {
                    current_meta.insert(key.clone(), attrs.get("value").cloned().unwrap_or_default());
                }
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(mapping)
}

/// Locate the gcode for a plate by its natural numeric order, preferring
/// `plate_<n>.gcode`; returns the file stem (without extension).
async fn detect_plate_gcode(metadata_dir: &Path, plate_index: Option<i64>) -> Option<String> {
    if let Some(index) = plate_index {
        let preferred = format!("plate_{index}");
        if metadata_dir.join(format!("{preferred}.gcode")).exists() {
            return Some(preferred);
        }
    }
    let mut entries = tokio::fs::read_dir(metadata_dir).await.ok()?;
    let mut candidates = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(stem) = name.strip_suffix(".gcode") {
            candidates.push(stem.to_string());
        }
    }
    candidates.sort_by_key(|stem| extract_plate_number(stem).unwrap_or(i64::MAX));
    candidates.into_iter().next()
}

fn extract_plate_number(name: &str) -> Option<i64> {
    let idx = name.find("plate_")?;
    name[idx + "plate_".len()..].chars().take_while(|c| c.is_ascii_digit()).collect::<String>().parse().ok()
}

/// First 300 lines of HEADER_BLOCK comments, matching the printer's own
/// gcode post-processor output.
async fn parse_gcode_header(plate_path: &Path) -> GcodeHeaderSummary {
    let mut summary = GcodeHeaderSummary::default();
    let Ok(file) = tokio::fs::File::open(plate_path).await else { return summary };
    use tokio::io::{AsyncBufReadExt, BufReader};
    let mut lines = BufReader::new(file).lines();
    let mut in_header = false;
    let mut count = 0;
    while count < 300 {
        count += 1;
        let Ok(Some(line)) = lines.next_line().await else { break };
        let stripped = line.trim();
        if stripped.contains("HEADER_BLOCK_START") {
            in_header = true;
            continue;
        }
        if stripped.contains("HEADER_BLOCK_END") {
            in_header = false;
            continue;
        }
        if in_header && stripped.starts_with(';') {
            let content = stripped.trim_start_matches(';').trim();
            if let Some(rest) = content.strip_prefix("model printing time:") {
                let parts: Vec<&str> = rest.splitn(2, ';').collect();
                summary.model_printing_time_s = parse_duration(parts[0]);
                if parts.len() > 1 {
                    if let Some(time_text) = parts[1].trim().strip_prefix("total estimated time:") {
                        summary.total_estimated_time_s = parse_duration(time_text.trim());
                    }
                }
            } else if let Some(rest) = content.strip_prefix("total layer number:") {
                summary.total_layer_number = rest.trim().parse().ok();
            } else if content.starts_with("total filament weight") {
                summary.total_filament_weight_g = content.rsplit(':').next().and_then(|v| v.trim().parse().ok());
            }
        }
        if let Some(rest) = stripped.strip_prefix("; filament_ids") {
            if let Some((_, value)) = rest.split_once('=') {
                summary.filament_ids = value.split(';').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect();
            }
        }
        if let Some(rest) = stripped.strip_prefix("; filament_settings_id") {
            if let Some((_, value)) = rest.split_once('=') {
                summary.filament_settings_id = extract_quoted(value);
            }
        }
    }
    summary
}

fn parse_duration(text: &str) -> Option<i64> {
    let re_h = regex_group(text, 'h');
    let re_m = regex_group(text, 'm');
    let re_s = regex_group(text, 's');
    if re_h.is_none() && re_m.is_none() && re_s.is_none() {
        return None;
    }
    Some(re_h.unwrap_or(0) * 3600 + re_m.unwrap_or(0) * 60 + re_s.unwrap_or(0))
}

/// Extract the integer immediately preceding `unit` in `(\d+)<unit>`
/// fragments, e.g. `"1h30m"` -> `30` for `unit='m'`.
fn regex_group(text: &str, unit: char) -> Option<i64> {
    let idx = text.find(unit)?;
    let digits: String = text[..idx].chars().rev().take_while(|c| c.is_ascii_digit()).collect();
    digits.chars().rev().collect::<String>().parse().ok()
}

fn extract_quoted(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '"' {
            let value: String = chars.by_ref().take_while(|c| *c != '"').collect();
            out.push(value);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_parent_directory_traversal() {
        assert!(validate_path("/../etc/passwd").is_err());
    }

    #[test]
    fn derives_display_name_from_path() {
        assert_eq!(validate_path("/models/cube.3mf").unwrap(), "cube.3mf");
    }

    #[test]
    fn splits_remote_path_into_parent_and_name() {
        assert_eq!(split_path("/models/cube.3mf"), ("/models".to_string(), "cube.3mf".to_string()));
        assert_eq!(split_path("cube.3mf"), ("/".to_string(), "cube.3mf".to_string()));
    }

    #[test]
    fn parses_duration_fragments() {
        assert_eq!(parse_duration("1h30m"), Some(5400));
        assert_eq!(parse_duration("45s"), Some(45));
        assert_eq!(parse_duration("no time here"), None);
    }

    #[test]
    fn extracts_quoted_filament_settings() {
        assert_eq!(extract_quoted("\"abc\";\"def\""), vec!["abc".to_string(), "def".to_string()]);
    }

    #[test]
    fn parses_slice_info_plates_filaments_and_objects() {
        let xml = r#"<?xml version="1.0"?>
<config>
  <plate>
    <metadata key="index" value="1"/>
    <metadata key="label_object_enabled" value="1"/>
    <filament id="1" tray_info_idx="GFL99" type="PLA" color="FF0000FF" used_m="1.2" used_g="3.4"/>
    <object identify_id="10" name="part_a" skipped="false"/>
  </plate>
</config>"#;
        let plates = parse_slice_info_xml(xml);
        assert_eq!(plates.len(), 1);
        assert_eq!(plates[0].index, Some(1));
        assert_eq!(plates[0].filaments[0].tray_info_idx, "GFL99");
        assert_eq!(plates[0].objects[0].identify_id, Some(10));
    }
}
