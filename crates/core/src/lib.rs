//! Face detection over a readiness-polled TCP socket.
//!
//! Clients send image paths; the server loads each image, runs a face
//! detector and answers with a JSON array of detections or a sentinel.

pub mod detection {
    pub mod domain {
        pub mod detection_record;
        pub mod face_detector;
        pub mod face_landmarks;
    }
    pub mod infrastructure;
}

pub mod imaging {
    pub mod domain {
        pub mod image_loader;
    }
    pub mod infrastructure;
}

pub mod request {
    pub mod process_request_use_case;
    pub mod request_logger;
    pub mod response;
}

pub mod server {
    pub mod connection_registry;
    pub mod event_loop;
    pub mod framing;
    pub mod response_sequencer;
    pub mod server_config;
    pub mod worker_pool;
}

pub mod shared {
    pub mod constants;
    pub mod frame;
}
