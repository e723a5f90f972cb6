// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bundled message and service types.

/// Types from the `std_msgs` package.
pub mod std_msgs {
    use crate::error::Result;
    use crate::message::{write_string, ByteReader, MessageType, RosMessage};

    /// `std_msgs/String`.
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct StringMsg {
        pub data: String,
    }

    impl StringMsg {
        pub const TYPE_NAME: &'static str = "std_msgs/String";
        pub const MD5SUM: &'static str = "992ce8a1687cec8c8bd883ec73ca41d1";
        pub const DEFINITION: &'static str = "string data\n";

        pub fn new(data: impl Into<String>) -> Self {
            Self { data: data.into() }
        }
    }

    impl RosMessage for StringMsg {
        fn message_type() -> MessageType {
            MessageType::new(Self::TYPE_NAME, Self::MD5SUM, Self::DEFINITION)
        }

        fn encode(&self, buf: &mut Vec<u8>) {
            write_string(buf, &self.data);
        }

        fn decode(bytes: &[u8]) -> Result<Self> {
            let mut reader = ByteReader::new(bytes);
            let data = reader.read_string()?;
            reader.finish()?;
            Ok(Self { data })
        }
    }
}

/// Types from the `std_srvs` package.
pub mod std_srvs {
    use crate::error::Result;
    use crate::message::{write_string, ByteReader, MessageType, RosMessage};
    use crate::service::{RosService, ServiceType};

    /// `std_srvs/Trigger`.
    pub struct Trigger;

    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct TriggerRequest;

    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct TriggerResponse {
        pub success: bool,
        pub message: String,
    }

    impl Trigger {
        pub const TYPE_NAME: &'static str = "std_srvs/Trigger";
        pub const MD5SUM: &'static str = "937c9679a518e3a18d831e57125ea522";
    }

    impl RosService for Trigger {
        type Request = TriggerRequest;
        type Response = TriggerResponse;

        fn service_type() -> ServiceType {
            ServiceType::new(Self::TYPE_NAME, Self::MD5SUM)
        }
    }

    impl RosMessage for TriggerRequest {
        fn message_type() -> MessageType {
            MessageType::new(
                "std_srvs/TriggerRequest",
                "d41d8cd98f00b204e9800998ecf8427e",
                "",
            )
        }

        fn encode(&self, _buf: &mut Vec<u8>) {}

        fn decode(bytes: &[u8]) -> Result<Self> {
            ByteReader::new(bytes).finish()?;
            Ok(Self)
        }
    }

    impl RosMessage for TriggerResponse {
        fn message_type() -> MessageType {
            MessageType::new(
                "std_srvs/TriggerResponse",
                Trigger::MD5SUM,
                "bool success\nstring message\n",
            )
        }

        fn encode(&self, buf: &mut Vec<u8>) {
            buf.push(u8::from(self.success));
            write_string(buf, &self.message);
        }

        fn decode(bytes: &[u8]) -> Result<Self> {
            let mut reader = ByteReader::new(bytes);
            let success = reader.read_bool()?;
            let message = reader.read_string()?;
            reader.finish()?;
            Ok(Self { success, message })
        }
    }
}
