pub mod database;
pub mod dns;
pub mod grpc;
pub mod http;
pub mod push;
pub mod tcp;
pub mod tls;

pub use database::DatabaseHandler;
pub use dns::DnsHandler;
pub use grpc::GrpcHandler;
pub use http::HttpHandler;
pub use push::PushHandler;
pub use tcp::TcpHandler;
pub use tls::TlsHandler;
