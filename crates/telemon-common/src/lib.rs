//! Types shared by the telemon agent and server: the gauge/counter metric
//! model and its wire DTO, the generated gRPC schema, and the envelope
//! primitives (MAC, chunked RSA, gzip) applied to ingest traffic.

pub mod convert;
pub mod crypto;
pub mod types;

pub mod proto {
    #![allow(clippy::pedantic)]
    #![allow(clippy::missing_errors_doc)]
    #![allow(clippy::doc_markdown)]
    #![allow(clippy::default_trait_access)]
    tonic::include_proto!("telemon");
}
