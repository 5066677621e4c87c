pub mod candle;
pub mod downloader;
pub mod gpu;
pub mod memory;
pub mod model;
pub mod template;

#[cfg(any(test, feature = "test-util"))]
pub mod fake;

pub use candle::{CandleLoader, CandleModel, HfChatTokenizer};
pub use downloader::{ensure_model_files, ModelFiles};
pub use gpu::{select_device, DeviceClass, DeviceConfig, GpuBackend};
pub use memory::{heap_releases, parse_memory_size, release_heap, MemoryLimits};
pub use model::{
    CausalLm, ChatTokenizer, EncodedPrompt, GenerationParams, LoadedModel, Message, MessageRole,
    ModelLoader,
};
pub use template::ChatTemplate;
