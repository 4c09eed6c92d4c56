pub(crate) const STUN_SERVER: &str = "stun:stun.l.google.com:19302";
