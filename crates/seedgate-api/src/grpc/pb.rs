//! Vendored prost/tonic definitions for the stat service
//! (`proto/torrent_web_seeder.proto`), kept in-tree so builds do not need
//! protoc.

/// Request naming a file within the torrent; the info-hash arrives via the
/// `info-hash` request metadata entry.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StatRequest {
    /// File display path; empty for whole-torrent stats.
    #[prost(string, tag = "1")]
    pub path: ::prost::alloc::string::String,
}

/// One progress frame.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StatReply {
    /// Completed bytes.
    #[prost(int64, tag = "1")]
    pub completed: i64,
    /// Total bytes.
    #[prost(int64, tag = "2")]
    pub total: i64,
    /// Connected peers.
    #[prost(int32, tag = "3")]
    pub peers: i32,
    /// Lifecycle status.
    #[prost(enumeration = "stat_reply::Status", tag = "4")]
    pub status: i32,
    /// Piece states; only the changed entries in diff frames.
    #[prost(message, repeated, tag = "5")]
    pub pieces: ::prost::alloc::vec::Vec<Piece>,
    /// Connected seeders.
    #[prost(int32, tag = "6")]
    pub seeders: i32,
    /// Connected leechers.
    #[prost(int32, tag = "7")]
    pub leechers: i32,
}

/// Nested definitions for [`StatReply`].
pub mod stat_reply {
    /// Lifecycle status.
    #[derive(
        Clone,
        Copy,
        Debug,
        PartialEq,
        Eq,
        Hash,
        PartialOrd,
        Ord,
        ::prost::Enumeration,
    )]
    #[repr(i32)]
    pub enum Status {
        /// The torrent is still activating.
        Initialization = 0,
        /// No peers and no bytes yet.
        WaitingForPeers = 1,
        /// The engine is verifying restored on-disk state.
        Restoring = 2,
        /// Bytes are flowing (or the torrent is complete).
        Seeding = 3,
        /// Peers are connected but nothing has been downloaded yet.
        Idle = 4,
        /// Final frame before the stream closes.
        Terminated = 5,
    }

    impl Status {
        /// String value of the enum field names used in the ProtoBuf
        /// definition.
        pub fn as_str_name(&self) -> &'static str {
            match self {
                Self::Initialization => "INITIALIZATION",
                Self::WaitingForPeers => "WAITING_FOR_PEERS",
                Self::Restoring => "RESTORING",
                Self::Seeding => "SEEDING",
                Self::Idle => "IDLE",
                Self::Terminated => "TERMINATED",
            }
        }
    }
}

/// State of one piece.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Piece {
    /// Piece position (file-relative in per-file frames).
    #[prost(int64, tag = "1")]
    pub position: i64,
    /// Whether the piece is downloaded and verified.
    #[prost(bool, tag = "2")]
    pub complete: bool,
    /// Request priority bucket.
    #[prost(enumeration = "piece::Priority", tag = "3")]
    pub priority: i32,
}

/// Nested definitions for [`Piece`].
pub mod piece {
    /// Request priority bucket.
    #[derive(
        Clone,
        Copy,
        Debug,
        PartialEq,
        Eq,
        Hash,
        PartialOrd,
        Ord,
        ::prost::Enumeration,
    )]
    #[repr(i32)]
    pub enum Priority {
        /// Not requested.
        None = 0,
        /// Default request priority.
        Normal = 1,
        /// Urgent, reader-driven priority.
        High = 2,
    }
}

/// Request for the torrent's file listing.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct FilesRequest {}

/// File listing reply.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FilesReply {
    /// Files within the torrent payload.
    #[prost(message, repeated, tag = "1")]
    pub files: ::prost::alloc::vec::Vec<File>,
}

/// One file of the torrent.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct File {
    /// Display path.
    #[prost(string, tag = "1")]
    pub path: ::prost::alloc::string::String,
}

/// Generated server implementations.
pub mod torrent_web_seeder_server {
    #![allow(unused_variables, dead_code, missing_docs, clippy::wildcard_imports)]
    use tonic::codegen::*;

    /// Generated trait containing gRPC methods that should be implemented
    /// for use with TorrentWebSeederServer.
    #[async_trait]
    pub trait TorrentWebSeeder: std::marker::Send + std::marker::Sync + 'static {
        async fn files(
            &self,
            request: tonic::Request<super::FilesRequest>,
        ) -> std::result::Result<tonic::Response<super::FilesReply>, tonic::Status>;

        async fn stat(
            &self,
            request: tonic::Request<super::StatRequest>,
        ) -> std::result::Result<tonic::Response<super::StatReply>, tonic::Status>;

        /// Server streaming response type for the StatStream method.
        type StatStreamStream: tonic::codegen::tokio_stream::Stream<
                Item = std::result::Result<super::StatReply, tonic::Status>,
            > + std::marker::Send
            + 'static;

        async fn stat_stream(
            &self,
            request: tonic::Request<super::StatRequest>,
        ) -> std::result::Result<tonic::Response<Self::StatStreamStream>, tonic::Status>;
    }

    #[derive(Debug)]
    pub struct TorrentWebSeederServer<T> {
        inner: Arc<T>,
        accept_compression_encodings: EnabledCompressionEncodings,
        send_compression_encodings: EnabledCompressionEncodings,
        max_decoding_message_size: Option<usize>,
        max_encoding_message_size: Option<usize>,
    }

    impl<T> TorrentWebSeederServer<T> {
        pub fn new(inner: T) -> Self {
            Self::from_arc(Arc::new(inner))
        }

        pub fn from_arc(inner: Arc<T>) -> Self {
            Self {
                inner,
                accept_compression_encodings: Default::default(),
                send_compression_encodings: Default::default(),
                max_decoding_message_size: None,
                max_encoding_message_size: None,
            }
        }

        pub fn with_interceptor<F>(inner: T, interceptor: F) -> InterceptedService<Self, F>
        where
            F: tonic::service::Interceptor,
        {
            InterceptedService::new(Self::new(inner), interceptor)
        }

        /// Enable decompressing requests with the given encoding.
        #[must_use]
        pub fn accept_compressed(mut self, encoding: CompressionEncoding) -> Self {
            self.accept_compression_encodings.enable(encoding);
            self
        }

        /// Compress responses with the given encoding, if the client supports it.
        #[must_use]
        pub fn send_compressed(mut self, encoding: CompressionEncoding) -> Self {
            self.send_compression_encodings.enable(encoding);
            self
        }

        /// Limits the maximum size of a decoded message.
        #[must_use]
        pub fn max_decoding_message_size(mut self, limit: usize) -> Self {
            self.max_decoding_message_size = Some(limit);
            self
        }

        /// Limits the maximum size of an encoded message.
        #[must_use]
        pub fn max_encoding_message_size(mut self, limit: usize) -> Self {
            self.max_encoding_message_size = Some(limit);
            self
        }
    }

    impl<T, B> tonic::codegen::Service<http::Request<B>> for TorrentWebSeederServer<T>
    where
        T: TorrentWebSeeder,
        B: Body + std::marker::Send + 'static,
        B::Error: Into<StdError> + std::marker::Send + 'static,
    {
        type Response = http::Response<tonic::body::BoxBody>;
        type Error = std::convert::Infallible;
        type Future = BoxFuture<Self::Response, Self::Error>;

        fn poll_ready(
            &mut self,
            _cx: &mut Context<'_>,
        ) -> Poll<std::result::Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: http::Request<B>) -> Self::Future {
            match req.uri().path() {
                "/torrentwebseeder.TorrentWebSeeder/Files" => {
                    #[allow(non_camel_case_types)]
                    struct FilesSvc<T: TorrentWebSeeder>(pub Arc<T>);
                    impl<T: TorrentWebSeeder> tonic::server::UnaryService<super::FilesRequest> for FilesSvc<T> {
                        type Response = super::FilesReply;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::FilesRequest>,
                        ) -> Self::Future {
                            let inner = Arc::clone(&self.0);
                            let fut = async move {
                                <T as TorrentWebSeeder>::files(&inner, request).await
                            };
                            Box::pin(fut)
                        }
                    }
                    let accept_compression_encodings = self.accept_compression_encodings;
                    let send_compression_encodings = self.send_compression_encodings;
                    let max_decoding_message_size = self.max_decoding_message_size;
                    let max_encoding_message_size = self.max_encoding_message_size;
                    let inner = self.inner.clone();
                    let fut = async move {
                        let method = FilesSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = tonic::server::Grpc::new(codec)
                            .apply_compression_config(
                                accept_compression_encodings,
                                send_compression_encodings,
                            )
                            .apply_max_message_size_config(
                                max_decoding_message_size,
                                max_encoding_message_size,
                            );
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/torrentwebseeder.TorrentWebSeeder/Stat" => {
                    #[allow(non_camel_case_types)]
                    struct StatSvc<T: TorrentWebSeeder>(pub Arc<T>);
                    impl<T: TorrentWebSeeder> tonic::server::UnaryService<super::StatRequest> for StatSvc<T> {
                        type Response = super::StatReply;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::StatRequest>,
                        ) -> Self::Future {
                            let inner = Arc::clone(&self.0);
                            let fut = async move {
                                <T as TorrentWebSeeder>::stat(&inner, request).await
                            };
                            Box::pin(fut)
                        }
                    }
                    let accept_compression_encodings = self.accept_compression_encodings;
                    let send_compression_encodings = self.send_compression_encodings;
                    let max_decoding_message_size = self.max_decoding_message_size;
                    let max_encoding_message_size = self.max_encoding_message_size;
                    let inner = self.inner.clone();
                    let fut = async move {
                        let method = StatSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = tonic::server::Grpc::new(codec)
                            .apply_compression_config(
                                accept_compression_encodings,
                                send_compression_encodings,
                            )
                            .apply_max_message_size_config(
                                max_decoding_message_size,
                                max_encoding_message_size,
                            );
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/torrentwebseeder.TorrentWebSeeder/StatStream" => {
                    #[allow(non_camel_case_types)]
                    struct StatStreamSvc<T: TorrentWebSeeder>(pub Arc<T>);
                    impl<T: TorrentWebSeeder>
                        tonic::server::ServerStreamingService<super::StatRequest>
                        for StatStreamSvc<T>
                    {
                        type Response = super::StatReply;
                        type ResponseStream = T::StatStreamStream;
                        type Future =
                            BoxFuture<tonic::Response<Self::ResponseStream>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::StatRequest>,
                        ) -> Self::Future {
                            let inner = Arc::clone(&self.0);
                            let fut = async move {
                                <T as TorrentWebSeeder>::stat_stream(&inner, request).await
                            };
                            Box::pin(fut)
                        }
                    }
                    let accept_compression_encodings = self.accept_compression_encodings;
                    let send_compression_encodings = self.send_compression_encodings;
                    let max_decoding_message_size = self.max_decoding_message_size;
                    let max_encoding_message_size = self.max_encoding_message_size;
                    let inner = self.inner.clone();
                    let fut = async move {
                        let method = StatStreamSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = tonic::server::Grpc::new(codec)
                            .apply_compression_config(
                                accept_compression_encodings,
                                send_compression_encodings,
                            )
                            .apply_max_message_size_config(
                                max_decoding_message_size,
                                max_encoding_message_size,
                            );
                        let res = grpc.server_streaming(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                _ => Box::pin(async move {
                    Ok(http::Response::builder()
                        .status(200)
                        .header("grpc-status", tonic::Code::Unimplemented as i32)
                        .header(
                            http::header::CONTENT_TYPE,
                            tonic::metadata::GRPC_CONTENT_TYPE,
                        )
                        .body(empty_body())
                        .unwrap())
                }),
            }
        }
    }

    impl<T> Clone for TorrentWebSeederServer<T> {
        fn clone(&self) -> Self {
            let inner = self.inner.clone();
            Self {
                inner,
                accept_compression_encodings: self.accept_compression_encodings,
                send_compression_encodings: self.send_compression_encodings,
                max_decoding_message_size: self.max_decoding_message_size,
                max_encoding_message_size: self.max_encoding_message_size,
            }
        }
    }

    /// Generated gRPC service name
    pub const SERVICE_NAME: &str = "torrentwebseeder.TorrentWebSeeder";

    impl<T> tonic::server::NamedService for TorrentWebSeederServer<T> {
        const NAME: &'static str = SERVICE_NAME;
    }
}
