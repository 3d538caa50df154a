//! Vendored client definitions for the external torrent-store gRPC service
//! (`proto/torrent_store.proto`), kept in-tree so builds do not need protoc.

/// Request for the bencoded metainfo of one torrent.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PullRequest {
    /// Lowercase hex info-hash.
    #[prost(string, tag = "1")]
    pub info_hash: ::prost::alloc::string::String,
}

/// Bencoded metainfo payload.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PullReply {
    /// Raw `.torrent` bytes.
    #[prost(bytes = "vec", tag = "1")]
    pub torrent: ::prost::alloc::vec::Vec<u8>,
}

/// Generated client implementations.
pub mod torrent_store_client {
    #![allow(unused_variables, dead_code, missing_docs, clippy::wildcard_imports)]
    use tonic::codegen::*;

    #[derive(Debug, Clone)]
    pub struct TorrentStoreClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl TorrentStoreClient<tonic::transport::Channel> {
        /// Attempt to create a new client by connecting to a given endpoint.
        pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
        where
            D: TryInto<tonic::transport::Endpoint>,
            D::Error: Into<StdError>,
        {
            let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
            Ok(Self::new(conn))
        }
    }

    impl<T> TorrentStoreClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + std::marker::Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + std::marker::Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }

        pub async fn pull(
            &mut self,
            request: impl tonic::IntoRequest<super::PullRequest>,
        ) -> std::result::Result<tonic::Response<super::PullReply>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::unknown(format!("Service was not ready: {}", e.into()))
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/torrentstore.TorrentStore/Pull");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("torrentstore.TorrentStore", "Pull"));
            self.inner.unary(req, path, codec).await
        }
    }
}
