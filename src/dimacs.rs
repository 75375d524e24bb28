/// This trait describes objects that can be repesented as
/// (a possible extension) of the DIMACS file format.
pub trait Dimacs {
    fn dimacs(&self) -> String;

    /// Writes the representation followed by a newline.
    fn write_dimacs<W: std::io::Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writeln!(writer, "{}", self.dimacs())
    }
}
