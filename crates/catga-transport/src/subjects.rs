//! Subject/topic naming (spec §6): `catga.request.<typeFqn>`,
//! `catga.event.<typeFqn>`, `catga.reply.<replyId>`; Redis Streams key
//! `catga:stream:<typeFqn>`.

pub fn request_subject(type_fqn: &str) -> String {
    format!("catga.request.{type_fqn}")
}

pub fn event_subject(type_fqn: &str) -> String {
    format!("catga.event.{type_fqn}")
}

pub fn reply_subject(reply_id: &str) -> String {
    format!("catga.reply.{reply_id}")
}

pub fn redis_stream_key(type_fqn: &str) -> String {
    format!("catga:stream:{type_fqn}")
}

/// spec §6: "consumer id `<hostId>-<pid>-<worker#>`".
pub fn redis_consumer_id(host_id: &str, worker: u32) -> String {
    format!("{host_id}-{}-{worker}", std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subjects_follow_the_spec_naming_scheme() {
        assert_eq!(request_subject("OrderCreated"), "catga.request.OrderCreated");
        assert_eq!(event_subject("OrderCreated"), "catga.event.OrderCreated");
        assert_eq!(reply_subject("abc123"), "catga.reply.abc123");
        assert_eq!(redis_stream_key("OrderCreated"), "catga:stream:OrderCreated");
    }
}
