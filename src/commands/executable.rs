use crate::connection::Connection;
use crate::reply::Reply;
use crate::Error;

pub trait Executable {
    fn exec<C: Connection>(self, conn: &mut C) -> Result<Reply, Error>;
}
