pub mod capture;
pub mod delivery;
pub mod openai;
pub mod realtime;
pub mod session;
pub mod storage;
pub mod vision;

// Re-export commonly used types for convenience
pub use capture::{CameraSession, CaptureError, CapturedImage, FileFrameSource, FrameSource};
pub use delivery::{
    DeliveryAdapter, DeliveryError, DeliveryOutcome, DeliveryPlan, DeliveryPolicy, SessionHandle,
};
pub use openai::{OpenAIClient, OpenAIError, RealtimeSettings, VisionSettings};
pub use realtime::{
    ClientEvent, DataChannel, RealtimeError, RealtimeEvent, RealtimeResult, ToolInvocation,
    WsDataChannel, classify,
};
pub use session::{
    AnalysisOutcome, AnalysisReport, ArtifactStore, PendingAnalysis, SessionController,
    SessionDeps, SessionPhase, UiState,
};
pub use storage::{StorageError, UploadStore};
pub use vision::{HttpVisionClient, VisionAnalyzer, VisionError, analyze_with_timeout};
