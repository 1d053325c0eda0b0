pub(crate) mod fetch;
pub(crate) mod status;

pub(crate) use fetch::fetch;
pub(crate) use status::status;
