pub mod memory;
pub mod pinecone;
pub mod qdrant;

pub use memory::InMemoryIndex;
pub use pinecone::{PineconeIndex, ServerlessSpec};
pub use qdrant::QdrantIndex;
