use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const BUFFER_SIZE: usize = 4096;

/// Bidirectional copy between two full-duplex streams with half-close
/// support.
///
/// A clean EOF on one direction shuts down the peer's write side and keeps
/// the opposite direction running. The first read or write error stops the
/// whole relay; the caller is expected to drop both streams, which closes
/// whatever is left. Returns the byte counts for both directions and the
/// first error observed, if any.
pub async fn copy_duplex<A, B>(a: &mut A, b: &mut B) -> (usize, usize, Option<std::io::Error>)
where
	A: AsyncRead + AsyncWrite + Unpin + ?Sized,
	B: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
	let mut a2b = [0u8; BUFFER_SIZE];
	let mut b2a = [0u8; BUFFER_SIZE];

	let mut a2b_num = 0;
	let mut b2a_num = 0;

	let mut a2b_done = false;
	let mut b2a_done = false;

	let mut first_err = None;

	while !(a2b_done && b2a_done) && first_err.is_none() {
		tokio::select! {
		   a2b_res = a.read(&mut a2b), if !a2b_done => match a2b_res {
			  Ok(0) => {
				 a2b_done = true;
				 // half-close: no more local bytes, tell the peer
				 let _ = b.shutdown().await;
			  }
			  Ok(num) => {
				 a2b_num += num;
				 if let Err(err) = b.write_all(&a2b[..num]).await {
					first_err = Some(err);
				 }
			  }
			  Err(err) => {
				 first_err = Some(err);
			  }
		   },
		   b2a_res = b.read(&mut b2a), if !b2a_done => match b2a_res {
			  Ok(0) => {
				 b2a_done = true;
				 let _ = a.shutdown().await;
			  }
			  Ok(num) => {
				 b2a_num += num;
				 if let Err(err) = a.write_all(&b2a[..num]).await {
					first_err = Some(err);
				 }
			  }
			  Err(err) => {
				 first_err = Some(err);
			  }
		   },
		}
	}

	(a2b_num, b2a_num, first_err)
}
