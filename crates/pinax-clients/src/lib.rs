pub mod model_gateway;
pub mod object_store;
pub mod retry;

pub use model_gateway::{ModelGateway, ModelGatewayClient};
pub use object_store::{ObjectStore, ObjectStoreClient};
